//! The agent process: connects to the console, reports its workers every
//! reporting interval and follows the console's worker commands.
mod workers;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub use workers::{WorkerCommand, WorkerSet};

use crate::communication::{
    ClientReceiver, ClientSender, ConnectionType, Connector, Sender,
};
use crate::config::AgentConfig;
use crate::engine::TestRegistry;
use crate::error::{AppError, AppResult, CommunicationError};
use crate::protocol::{AgentIdentity, AgentProcessReport, WireMessage};
use crate::shutdown::ShutdownReceiver;

/// Connects to the console and runs until `shutdown` fires or the console
/// goes away.
///
/// # Errors
///
/// Returns an error if either console channel cannot be reached, or as for
/// [`Agent::run`].
pub async fn run_agent(config: &AgentConfig, shutdown: ShutdownReceiver) -> AppResult<()> {
    let agent = Agent::connect(config).await?;
    agent.run(shutdown).await
}

enum AgentEvent {
    Shutdown,
    Report,
    Control(AppResult<Option<WireMessage>>),
}

/// One connected agent process.
pub struct Agent {
    identity: AgentIdentity,
    workers: WorkerSet,
    control: ClientReceiver<WireMessage>,
    reports: Arc<dyn Sender<WireMessage>>,
    registry: Arc<TestRegistry>,
    report_interval: Duration,
}

impl Agent {
    /// Opens the control and report channels to the console.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Connection`] if either channel cannot
    /// be opened.
    pub async fn connect(config: &AgentConfig) -> AppResult<Self> {
        let identity = AgentIdentity {
            id: format!("{}-{}", config.name, std::process::id()),
            name: config.name.clone(),
        };
        info!(
            "Agent {} connecting to console {} / {}",
            identity.id, config.console_control, config.console_report
        );
        let control = ClientReceiver::connect(&Connector::new(
            config.console_control,
            ConnectionType::Control,
        ))
        .await?;
        let reports: Arc<dyn Sender<WireMessage>> = Arc::new(
            ClientSender::connect(&Connector::new(
                config.console_report,
                ConnectionType::Report,
            ))
            .await?,
        );

        Ok(Self {
            workers: WorkerSet::new(identity.clone(), config.workers, config.threads),
            identity,
            control,
            registry: Arc::new(TestRegistry::new(Arc::clone(&reports))),
            reports,
            report_interval: config.report_interval,
        })
    }

    #[must_use]
    pub const fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Tests registered here are announced to the console, and their
    /// statistics are reported with every status report.
    #[must_use]
    pub const fn registry(&self) -> &Arc<TestRegistry> {
        &self.registry
    }

    /// Reports status until `shutdown` fires or the console goes away, then
    /// sends a final report with every worker finished.
    ///
    /// # Errors
    ///
    /// Returns an error if a report cannot be encoded or the control
    /// channel fails for a reason other than disconnection.
    pub async fn run(mut self, mut shutdown: ShutdownReceiver) -> AppResult<()> {
        let mut ticker = tokio::time::interval(self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            let event = tokio::select! {
                _ = shutdown.recv() => AgentEvent::Shutdown,
                _ = ticker.tick() => AgentEvent::Report,
                message = self.control.wait_for_message() => AgentEvent::Control(message),
            };
            match event {
                AgentEvent::Shutdown => break Ok(()),
                AgentEvent::Report => match self.report().await {
                    Ok(()) => {}
                    Err(err @ AppError::Communication(
                        CommunicationError::PeerWrite { .. } | CommunicationError::ConnectionClosed,
                    )) => {
                        info!("Console report channel lost: {}", err);
                        break Ok(());
                    }
                    Err(err) => break Err(err),
                },
                AgentEvent::Control(Ok(Some(message))) => self.handle_control(message),
                AgentEvent::Control(Ok(None)) => {
                    info!("Console closed the control connection");
                    break Ok(());
                }
                AgentEvent::Control(Err(
                    err @ AppError::Communication(CommunicationError::Queued { .. }),
                )) => {
                    warn!("Control channel: {}", err);
                }
                AgentEvent::Control(Err(err)) => break Err(err),
            }
        };

        self.workers.apply(&WorkerCommand::Stop);
        if let Err(err) = self.report().await {
            debug!("Final report not delivered: {}", err);
        }
        self.control.shutdown();
        self.reports.shutdown();
        outcome
    }

    fn handle_control(&mut self, message: WireMessage) {
        match WorkerCommand::from_message(message) {
            Some(command) => self.workers.apply(&command),
            None => warn!("Ignoring unexpected message on the control channel"),
        }
    }

    async fn report(&self) -> AppResult<()> {
        self.reports
            .send(&WireMessage::AgentReport(AgentProcessReport {
                identity: self.identity.clone(),
                state: self.workers.agent_state(),
            }))
            .await?;
        for worker in self.workers.reports() {
            self.reports.send(&WireMessage::WorkerReport(worker)).await?;
        }
        if let Some(statistics) = self.registry.statistics_delta() {
            self.reports.send(&statistics).await?;
        }
        Ok(())
    }
}
