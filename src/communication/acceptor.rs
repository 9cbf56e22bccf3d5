use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, CommunicationError};

use super::connection::ConnectionType;
use super::pool::ResourcePool;
use super::socket::SocketResource;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Listens on one socket per connection type and feeds accepted
/// connections into that type's [`ResourcePool`].
///
/// The acceptor is the only writer of pool membership.
pub struct Acceptor {
    pools: BTreeMap<ConnectionType, ResourcePool<SocketResource>>,
    addresses: BTreeMap<ConnectionType, SocketAddr>,
    stop_tx: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Acceptor {
    /// Binds every listener, then starts one accept loop per listener.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Bind`] if any address cannot be bound;
    /// listeners bound before the failure are released.
    pub async fn bind(bindings: &BTreeMap<ConnectionType, SocketAddr>) -> AppResult<Self> {
        let mut listeners = Vec::with_capacity(bindings.len());
        for (connection_type, addr) in bindings {
            let listener = TcpListener::bind(addr).await.map_err(|err| {
                AppError::communication(CommunicationError::Bind {
                    connection_type: *connection_type,
                    addr: *addr,
                    source: err,
                })
            })?;
            let local = listener.local_addr().map_err(|err| {
                AppError::communication(CommunicationError::Io {
                    context: "read listener address",
                    source: err,
                })
            })?;
            info!("Listening for {} connections on {}", connection_type, local);
            listeners.push((*connection_type, local, listener));
        }

        let (stop_tx, _) = watch::channel(false);
        let mut pools = BTreeMap::new();
        let mut addresses = BTreeMap::new();
        let mut loops = Vec::with_capacity(listeners.len());
        for (connection_type, local, listener) in listeners {
            let pool = ResourcePool::new();
            loops.push(tokio::spawn(accept_loop(
                connection_type,
                listener,
                pool.clone(),
                stop_tx.subscribe(),
            )));
            pools.insert(connection_type, pool);
            addresses.insert(connection_type, local);
        }

        Ok(Self {
            pools,
            addresses,
            stop_tx,
            loops: Mutex::new(loops),
        })
    }

    /// The pool backing `connection_type`.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::UnknownConnectionType`] if no listener
    /// was bound for that type.
    pub fn socket_set(
        &self,
        connection_type: ConnectionType,
    ) -> AppResult<ResourcePool<SocketResource>> {
        self.pools.get(&connection_type).cloned().ok_or_else(|| {
            AppError::communication(CommunicationError::UnknownConnectionType { connection_type })
        })
    }

    /// Actual bound address, useful when binding to port 0.
    #[must_use]
    pub fn local_addr(&self, connection_type: ConnectionType) -> Option<SocketAddr> {
        self.addresses.get(&connection_type).copied()
    }

    /// Stops listening and shuts down every pool. Idempotent.
    pub fn shutdown(&self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        for pool in self.pools.values() {
            pool.shutdown();
        }
        debug!("Acceptor shut down");
    }

    /// Waits for the accept loops to exit, which releases their ports.
    ///
    /// # Errors
    ///
    /// Returns an error if an accept loop task could not be joined.
    pub async fn await_termination(&self) -> AppResult<()> {
        let loops = std::mem::take(&mut *self.loops.lock());
        for accept_loop in loops {
            accept_loop.await?;
        }
        Ok(())
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    connection_type: ConnectionType,
    listener: TcpListener,
    pool: ResourcePool<SocketResource>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(result) => result,
            Err(err) => {
                warn!("Failed to accept {} connection: {}", connection_type, err);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        let resource = match SocketResource::new(stream, connection_type) {
            Ok(resource) => resource,
            Err(err) => {
                warn!("Rejected {} connection from {}: {}", connection_type, peer, err);
                continue;
            }
        };
        match pool.add(resource) {
            Ok(key) => info!(
                "Accepted {} connection from {} as {}",
                connection_type, peer, key
            ),
            Err(err) => {
                debug!("Dropping {} connection from {}: {}", connection_type, peer, err);
                break;
            }
        }
    }
    debug!("{} acceptor stopped", connection_type);
}
