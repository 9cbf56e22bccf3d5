use std::net::SocketAddr;

use thiserror::Error;

use crate::communication::ConnectionType;

/// A failure carried through a [`crate::communication::MessageQueue`] in
/// place of a message.
pub type QueuedFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    #[error("resource pool")]
    ResourcePool,
    #[error("kernel")]
    Kernel,
    #[error("message queue")]
    MessageQueue,
    #[error("acceptor")]
    Acceptor,
}

#[derive(Debug, Error)]
pub enum CommunicationError {
    #[error("The {component} has been shut down.")]
    Shutdown { component: Component },
    #[error("Interrupted while waiting.")]
    Interrupted,
    #[error("Failed to bind {connection_type} listener on {addr}: {source}")]
    Bind {
        connection_type: ConnectionType,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("No listener is bound for connection type {connection_type}.")]
    UnknownConnectionType { connection_type: ConnectionType },
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write to peer {peer}: {source}")]
    PeerWrite {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("{message}")]
    Queued {
        message: String,
        #[source]
        source: QueuedFailure,
    },
    #[error("This message queue does not accept failures.")]
    FailuresNotQueueable,
    #[error("Kernel queue is full ({capacity} pending tasks).")]
    QueueFull { capacity: usize },
    #[error("Kernel task panicked: {message}")]
    TaskPanicked { message: String },
    #[error("Kernel task was abandoned before it completed.")]
    TaskAbandoned,
    #[error("Broadcast failed for {failed} of {attempted} peers.")]
    BroadcastFailed { failed: usize, attempted: usize },
    #[error("Wire message exceeded max size ({max_bytes} bytes).")]
    WireMessageTooLarge { max_bytes: usize },
    #[error("Wire message was not valid UTF-8: {source}")]
    WireMessageInvalidUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
