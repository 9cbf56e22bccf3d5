use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, CommunicationError};

use super::acceptor::Acceptor;
use super::connection::ConnectionType;
use super::pool::ResourcePool;
use super::queue::MessageQueue;
use super::socket::{PeerConnection, SocketResource};

#[derive(Debug, Clone, Copy)]
pub struct ReceiverConfig {
    pub threads: NonZeroUsize,
    /// How long a reader waits on one connection before moving on.
    pub poll_interval: Duration,
}

/// Inbound side of a server: reader tasks take turns on the pooled
/// connections and feed every decoded message into one queue.
///
/// A line that fails to decode is queued as a failure. A connection that
/// reaches end of stream or fails with an I/O error is closed and leaves
/// the pool.
pub struct ServerReceiver<M> {
    queue: Arc<MessageQueue<M>>,
    stop_tx: watch::Sender<bool>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl<M> ServerReceiver<M>
where
    M: DeserializeOwned + Send + 'static,
{
    /// # Errors
    ///
    /// Returns an error if `acceptor` has no listener for `connection_type`.
    pub fn new(
        acceptor: &Acceptor,
        connection_type: ConnectionType,
        config: &ReceiverConfig,
    ) -> AppResult<Self> {
        Ok(Self::with_pool(acceptor.socket_set(connection_type)?, config))
    }

    #[must_use]
    pub fn with_pool(pool: ResourcePool<SocketResource>, config: &ReceiverConfig) -> Self {
        let queue = Arc::new(MessageQueue::new(true));
        let (stop_tx, _) = watch::channel(false);
        let readers = (0..config.threads.get())
            .map(|index| {
                tokio::spawn(read_loop(
                    index,
                    pool.clone(),
                    Arc::clone(&queue),
                    config.poll_interval,
                    stop_tx.subscribe(),
                ))
            })
            .collect();
        Self {
            queue,
            stop_tx,
            readers: Mutex::new(readers),
        }
    }

    /// Waits for the next inbound message. Returns `Ok(None)` once the
    /// receiver has been shut down.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Queued`] for a message that could not
    /// be decoded.
    pub async fn wait_for_message(&self) -> AppResult<Option<M>> {
        match self.queue.dequeue(true).await {
            Ok(message) => Ok(message),
            Err(err) if err.is_shutdown() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<M> ServerReceiver<M> {
    /// Stops the readers and discards undelivered messages. Idempotent.
    pub fn shutdown(&self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        self.queue.shutdown();
        for reader in self.readers.lock().drain(..) {
            reader.abort();
        }
        debug!("Server receiver shut down");
    }
}

impl<M> Drop for ServerReceiver<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_loop<M>(
    index: usize,
    pool: ResourcePool<SocketResource>,
    queue: Arc<MessageQueue<M>>,
    poll_interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) where
    M: DeserializeOwned + Send + 'static,
{
    loop {
        let reservation = tokio::select! {
            biased;
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
            reserved = pool.reserve_next() => match reserved {
                Ok(reservation) => reservation,
                Err(err) => {
                    debug!("Reader {} stopping: {}", index, err);
                    break;
                }
            },
        };
        let socket = reservation.resource();

        let read = tokio::select! {
            biased;
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
            read = tokio::time::timeout(poll_interval, socket.read_message::<M>()) => read,
        };
        let queued = match read {
            Err(_elapsed) => Ok(()),
            Ok(Ok(Some(message))) => queue.queue(message),
            Ok(Ok(None)) => {
                info!("Peer {} disconnected", socket.peer());
                reservation.close();
                Ok(())
            }
            Ok(Err(AppError::Communication(CommunicationError::Io { source, .. }))) => {
                warn!("Lost connection to {}: {}", socket.peer(), source);
                reservation.close();
                Ok(())
            }
            Ok(Err(err)) => {
                warn!("Undecodable message from {}: {}", socket.peer(), err);
                queue.queue_failure(err)
            }
        };
        reservation.free();

        if let Err(err) = queued {
            debug!("Reader {} stopping: {}", index, err);
            break;
        }
    }
}
