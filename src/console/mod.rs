//! The console: accepts agents, tracks their processes and broadcasts
//! commands to them.
mod model;
mod process_status;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use model::{ConsoleModel, TestTotals};
pub use process_status::{AgentAndWorkers, ProcessStatus, ProcessStatusListener, StatusConfig};

use crate::communication::{
    Acceptor, BroadcastReport, ConnectionType, FanOutSender, ServerReceiver,
};
use crate::config::ConsoleConfig;
use crate::error::{AppError, AppResult, CommunicationError};
use crate::protocol::{StartWorkersMessage, WireMessage};
use crate::shutdown::{ShutdownReceiver, interruptible};

/// Consumes inbound messages the console does not handle itself.
pub trait MessageHandler: Send + Sync {
    /// Returns `true` if the message was handled; later handlers are then
    /// skipped.
    fn handle(&self, message: &WireMessage) -> bool;
}

/// Logs agent arrivals and departures.
struct StatusLogger;

impl ProcessStatusListener for StatusLogger {
    fn update(&self, processes: &[AgentAndWorkers], agents_changed: bool) {
        if agents_changed {
            info!("{} agent(s) known", processes.len());
        }
        for entry in processes {
            debug!(
                "Agent {} ({}): {}, {} worker(s)",
                entry.agent.identity.name,
                entry.agent.identity.id,
                entry.agent.state.as_str(),
                entry.workers.len()
            );
        }
    }
}

/// Console side of the protocol: commands go out on the control channel,
/// reports come in on the report channel.
pub struct ConsoleCommunication {
    acceptor: Acceptor,
    sender: FanOutSender,
    receiver: ServerReceiver<WireMessage>,
    status: Arc<ProcessStatus>,
    handlers: Mutex<Vec<Arc<dyn MessageHandler>>>,
    status_interval: Duration,
}

impl ConsoleCommunication {
    /// Binds both listeners and starts the sender and receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener cannot be bound.
    pub async fn start(config: &ConsoleConfig) -> AppResult<Self> {
        let acceptor = Acceptor::bind(&config.bindings()).await?;
        let sender = FanOutSender::new(&acceptor, ConnectionType::Control, &config.sender)?;
        let receiver = ServerReceiver::new(&acceptor, ConnectionType::Report, &config.receiver)?;
        let status = Arc::new(ProcessStatus::new(config.status));
        status.add_listener(Arc::new(StatusLogger));

        Ok(Self {
            acceptor,
            sender,
            receiver,
            status,
            handlers: Mutex::new(Vec::new()),
            status_interval: config.status_interval,
        })
    }

    #[must_use]
    pub fn local_addr(&self, connection_type: ConnectionType) -> Option<SocketAddr> {
        self.acceptor.local_addr(connection_type)
    }

    #[must_use]
    pub const fn process_status(&self) -> &Arc<ProcessStatus> {
        &self.status
    }

    /// Agents with an open control connection.
    #[must_use]
    pub fn connected_agents(&self) -> usize {
        self.sender.pool().count_active()
    }

    pub fn add_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.lock().push(handler);
    }

    /// Waits for one inbound message and dispatches it. Returns `false` once
    /// the receiver has shut down.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Queued`] for a message that could not
    /// be decoded.
    pub async fn process_one_message(&self) -> AppResult<bool> {
        let Some(message) = self.receiver.wait_for_message().await? else {
            return Ok(false);
        };
        self.dispatch(message);
        Ok(true)
    }

    fn dispatch(&self, message: WireMessage) {
        match message {
            WireMessage::AgentReport(report) => self.status.add_agent_report(report),
            WireMessage::WorkerReport(report) => self.status.add_worker_report(report),
            WireMessage::Error(report) => error!("Agent error: {}", report.message),
            message @ (WireMessage::StartWorkers(_)
            | WireMessage::ResetWorkers
            | WireMessage::StopWorkers
            | WireMessage::RegisterTests(_)
            | WireMessage::ReportStatistics(_)) => {
                let handlers = self.handlers.lock().clone();
                if !handlers.iter().any(|handler| handler.handle(&message)) {
                    warn!("Unhandled message: {:?}", message);
                }
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the control pool has been shut down.
    pub async fn start_workers(&self, message: StartWorkersMessage) -> AppResult<BroadcastReport> {
        self.broadcast(&WireMessage::StartWorkers(message)).await
    }

    /// # Errors
    ///
    /// Returns an error if the control pool has been shut down.
    pub async fn reset_workers(&self) -> AppResult<BroadcastReport> {
        self.broadcast(&WireMessage::ResetWorkers).await
    }

    /// # Errors
    ///
    /// Returns an error if the control pool has been shut down.
    pub async fn stop_workers(&self) -> AppResult<BroadcastReport> {
        self.broadcast(&WireMessage::StopWorkers).await
    }

    async fn broadcast(&self, message: &WireMessage) -> AppResult<BroadcastReport> {
        let report = self.sender.broadcast(message).await?;
        for failure in &report.failed {
            warn!("Failed to reach agent {}: {}", failure.peer, failure.error);
        }
        Ok(report)
    }

    /// Checks every control connection and drops those whose agent has
    /// gone. Returns whether any agent had disconnected.
    ///
    /// # Errors
    ///
    /// Returns an error if the control pool has been shut down.
    pub async fn prune_disconnected_agents(&self) -> AppResult<bool> {
        let pruned = self.sender.is_peer_shutdown().await?;
        if pruned {
            info!(
                "Dropped disconnected agent connections; {} remain",
                self.connected_agents()
            );
        }
        Ok(pruned)
    }

    /// Processes messages until `shutdown` fires or the receiver stops,
    /// updating process status and pruning departed agents every status
    /// interval. Shuts the console down before returning.
    ///
    /// # Errors
    ///
    /// Returns the first error that is neither an interruption nor an
    /// undecodable message.
    pub async fn run(self: &Arc<Self>, shutdown: ShutdownReceiver) -> AppResult<()> {
        let updates = self
            .status
            .spawn_updates(self.status_interval, shutdown.resubscribe());
        let pruning = self.spawn_pruning(shutdown.resubscribe());
        let mut shutdown = shutdown;

        let outcome = loop {
            match interruptible(self.process_one_message(), &mut shutdown).await {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(err) if err.is_interrupted() => break Ok(()),
                Err(err @ AppError::Communication(CommunicationError::Queued { .. })) => {
                    warn!("Dropped inbound message: {}", err);
                }
                Err(err) => break Err(err),
            }
        };

        self.shutdown();
        updates.abort();
        pruning.abort();
        outcome
    }

    fn spawn_pruning(self: &Arc<Self>, mut shutdown: ShutdownReceiver) -> JoinHandle<()> {
        let console = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(console.status_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = console.prune_disconnected_agents().await {
                            debug!("Agent pruning stopped: {}", err);
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Stops accepting, sending and receiving. Idempotent.
    pub fn shutdown(&self) {
        self.receiver.shutdown();
        self.sender.shutdown();
        self.acceptor.shutdown();
    }
}
