use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, CommunicationError};
use crate::protocol::encode_line;

use super::acceptor::Acceptor;
use super::connection::ConnectionType;
use super::kernel::Kernel;
use super::pool::ResourcePool;
use super::socket::{PeerConnection, SocketResource};


/// Outbound side of a channel: one destination (a client socket) or many
/// (a fan-out).
#[async_trait]
pub trait Sender<M>: Send + Sync
where
    M: Serialize + Sync,
{
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the sender has
    /// been shut down. Fan-out senders log individual peer failures instead.
    async fn send(&self, message: &M) -> AppResult<()>;

    fn shutdown(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
    pub threads: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
}

#[derive(Debug)]
pub struct PeerFailure {
    pub peer: SocketAddr,
    pub error: AppError,
}

/// Outcome of one broadcast, in pool key order.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<SocketAddr>,
    pub failed: Vec<PeerFailure>,
}

impl BroadcastReport {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered.len().saturating_add(self.failed.len())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns the delivered peers, or an aggregate error if any peer failed.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::BroadcastFailed`] when at least one
    /// peer failed.
    pub fn into_result(self) -> AppResult<Vec<SocketAddr>> {
        if self.failed.is_empty() {
            return Ok(self.delivered);
        }
        Err(AppError::communication(CommunicationError::BroadcastFailed {
            failed: self.failed.len(),
            attempted: self.attempted(),
        }))
    }
}

/// Broadcasts messages to every connection in a pool, writing to the peers
/// in parallel on a [`Kernel`].
pub struct FanOutSender<C: PeerConnection = SocketResource> {
    pool: ResourcePool<C>,
    kernel: Kernel,
}

impl FanOutSender<SocketResource> {
    /// Sends to the connections `acceptor` accepts for `connection_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if `acceptor` has no listener for `connection_type`.
    pub fn new(
        acceptor: &Acceptor,
        connection_type: ConnectionType,
        config: &SenderConfig,
    ) -> AppResult<Self> {
        let pool = acceptor.socket_set(connection_type)?;
        Ok(Self::with_pool(
            pool,
            Kernel::new(config.threads, config.queue_capacity),
        ))
    }
}

impl<C: PeerConnection> FanOutSender<C> {
    #[must_use]
    pub const fn with_pool(pool: ResourcePool<C>, kernel: Kernel) -> Self {
        Self { pool, kernel }
    }

    #[must_use]
    pub const fn pool(&self) -> &ResourcePool<C> {
        &self.pool
    }

    /// Writes `message` to every connection present when the call starts.
    ///
    /// The message is encoded once. Each peer gets its own kernel job, which
    /// frees the peer's reservation whatever the write outcome. A failing
    /// peer is reported in [`BroadcastReport::failed`] and does not affect
    /// the others. With no connections this succeeds with an empty report.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the pool has
    /// been shut down.
    pub async fn broadcast<M: Serialize>(&self, message: &M) -> AppResult<BroadcastReport> {
        let bytes: Arc<[u8]> = Arc::from(encode_line(message)?);
        let reservations = self.pool.reserve_all().await?;
        let mut report = BroadcastReport::default();
        if reservations.is_empty() {
            debug!("Broadcast has no connected peers");
            return Ok(report);
        }

        let mut pending = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            let peer = reservation.resource().peer();
            let bytes = Arc::clone(&bytes);
            let submitted = self
                .kernel
                .execute_when_ready(async move {
                    let written = reservation.resource().write_all(&bytes).await;
                    reservation.free();
                    written
                })
                .await;
            match submitted {
                Ok(handle) => pending.push((peer, handle)),
                Err(error) => report.failed.push(PeerFailure { peer, error }),
            }
        }

        for (peer, handle) in pending {
            match handle.join().await {
                Ok(()) => report.delivered.push(peer),
                Err(error) => report.failed.push(PeerFailure { peer, error }),
            }
        }
        debug!(
            "Broadcast delivered to {} of {} peers",
            report.delivered.len(),
            report.attempted()
        );
        Ok(report)
    }

    /// Checks every connection for a shut down peer. Every reservation is
    /// freed, including when the call is cancelled part way through.
    ///
    /// # Errors
    ///
    /// Returns a shutdown error if the pool has been shut down.
    pub async fn is_peer_shutdown(&self) -> AppResult<bool> {
        let reservations = self.pool.reserve_all().await?;
        let mut shut_down = false;
        for reservation in reservations {
            if reservation.resource().is_peer_shutdown().await {
                shut_down = true;
            }
            reservation.free();
        }
        Ok(shut_down)
    }

    /// Stops the write kernel. The pool belongs to the acceptor and is left
    /// alone.
    pub fn shutdown(&self) {
        self.kernel.shutdown();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.kernel.is_shutdown()
    }
}

#[async_trait]
impl<M, C> Sender<M> for FanOutSender<C>
where
    M: Serialize + Sync,
    C: PeerConnection,
{
    async fn send(&self, message: &M) -> AppResult<()> {
        let report = self.broadcast(message).await?;
        for failure in &report.failed {
            warn!("Failed to send to {}: {}", failure.peer, failure.error);
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.kernel.shutdown();
    }
}
