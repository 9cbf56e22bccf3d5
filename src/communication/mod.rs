//! Fan-out communication: pooled peer connections, a bounded worker
//! kernel, and the senders and receivers built on them.

mod acceptor;
mod client;
mod connection;
mod kernel;
mod pool;
mod queue;
mod receiver;
mod sender;
mod socket;

#[cfg(test)]
pub(crate) mod test_support;

pub use acceptor::Acceptor;
pub use client::{ClientReceiver, ClientSender, Connector};
pub use connection::ConnectionType;
pub use kernel::{Kernel, TaskHandle};
pub use pool::{Reservation, Resource, ResourceKey, ResourcePool};
pub use queue::{MessageQueue, MessageQueueGuard, QueueEntry};
pub use receiver::{ReceiverConfig, ServerReceiver};
pub use sender::{BroadcastReport, FanOutSender, PeerFailure, Sender, SenderConfig};
pub use socket::{PeerConnection, SocketResource};
