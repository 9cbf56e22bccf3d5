use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, CommunicationError};
use crate::protocol::encode_line;

use super::connection::ConnectionType;
use super::pool::Resource;
use super::queue::MessageQueue;
use super::sender::Sender;
use super::socket::{PeerConnection, SocketResource};

/// Opens client connections of one type to a server address.
#[derive(Debug, Clone, Copy)]
pub struct Connector {
    addr: SocketAddr,
    connection_type: ConnectionType,
}

impl Connector {
    #[must_use]
    pub const fn new(addr: SocketAddr, connection_type: ConnectionType) -> Self {
        Self {
            addr,
            connection_type,
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// # Errors
    ///
    /// Returns [`CommunicationError::Connection`] if the server cannot be
    /// reached.
    pub async fn connect(&self) -> AppResult<Arc<SocketResource>> {
        let stream = TcpStream::connect(self.addr).await.map_err(|err| {
            AppError::communication(CommunicationError::Connection {
                addr: self.addr,
                source: err,
            })
        })?;
        debug!("Connected {} channel to {}", self.connection_type, self.addr);
        Ok(Arc::new(SocketResource::new(stream, self.connection_type)?))
    }
}

/// Sends every message over a single connection.
#[derive(Debug)]
pub struct ClientSender {
    socket: Arc<SocketResource>,
}

impl ClientSender {
    #[must_use]
    pub const fn new(socket: Arc<SocketResource>) -> Self {
        Self { socket }
    }

    /// # Errors
    ///
    /// As for [`Connector::connect`].
    pub async fn connect(connector: &Connector) -> AppResult<Self> {
        Ok(Self::new(connector.connect().await?))
    }
}

#[async_trait]
impl<M> Sender<M> for ClientSender
where
    M: Serialize + Sync,
{
    async fn send(&self, message: &M) -> AppResult<()> {
        let bytes = encode_line(message)?;
        self.socket.write_all(&bytes).await
    }

    fn shutdown(&self) {
        self.socket.close();
    }
}

/// Reads messages from a single connection into a queue.
///
/// End of stream and I/O errors are delivered as a
/// [`CommunicationError::Queued`] failure wrapping
/// [`CommunicationError::ConnectionClosed`]; the queue is then closed, so
/// the receiver yields `Ok(None)` once everything before it is consumed.
pub struct ClientReceiver<M> {
    queue: Arc<MessageQueue<M>>,
    reader: JoinHandle<()>,
}

impl<M> ClientReceiver<M>
where
    M: DeserializeOwned + Send + 'static,
{
    #[must_use]
    pub fn new(socket: Arc<SocketResource>) -> Self {
        let queue = Arc::new(MessageQueue::new(true));
        let reader = tokio::spawn(read_loop(socket, Arc::clone(&queue)));
        Self { queue, reader }
    }

    /// # Errors
    ///
    /// As for [`Connector::connect`].
    pub async fn connect(connector: &Connector) -> AppResult<Self> {
        Ok(Self::new(connector.connect().await?))
    }

    /// Waits for the next message; `Ok(None)` once the connection is gone
    /// and its failure has been reported, or after shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Queued`] for a disconnect or an
    /// undecodable message.
    pub async fn wait_for_message(&self) -> AppResult<Option<M>> {
        match self.queue.dequeue(true).await {
            Ok(message) => Ok(message),
            Err(err) if err.is_shutdown() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<M> ClientReceiver<M> {
    pub fn shutdown(&self) {
        self.reader.abort();
        self.queue.shutdown();
    }
}

impl<M> Drop for ClientReceiver<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_loop<M>(socket: Arc<SocketResource>, queue: Arc<MessageQueue<M>>)
where
    M: DeserializeOwned + Send + 'static,
{
    loop {
        let closed = match socket.read_message::<M>().await {
            Ok(Some(message)) => {
                if queue.queue(message).is_err() {
                    return;
                }
                continue;
            }
            Ok(None) => {
                debug!("Server {} closed the connection", socket.peer());
                true
            }
            Err(AppError::Communication(CommunicationError::Io { source, .. })) => {
                warn!("Lost connection to {}: {}", socket.peer(), source);
                true
            }
            Err(err) => {
                warn!("Undecodable message from {}: {}", socket.peer(), err);
                if queue.queue_failure(err).is_err() {
                    return;
                }
                false
            }
        };
        if closed {
            socket.close();
            if let Err(err) = queue.queue_failure(CommunicationError::ConnectionClosed) {
                debug!("Dropped disconnect notice for {}: {}", socket.peer(), err);
            }
            queue.close();
            return;
        }
    }
}
