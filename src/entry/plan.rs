use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent::run_agent;
use crate::args::{Command, LoadherdArgs};
use crate::communication::ConnectionType;
use crate::config::{AgentConfig, ConsoleConfig, load_config, resolve_agent, resolve_console};
use crate::console::{ConsoleCommunication, ConsoleModel, MessageHandler};
use crate::error::AppResult;
use crate::protocol::StartWorkersMessage;
use crate::shutdown::{ShutdownReceiver, ShutdownSender};
use crate::shutdown_handlers::{setup_signal_shutdown_handler, shutdown_channel};

pub(super) enum RunPlan {
    Console(ConsoleConfig),
    Agent(AgentConfig),
}

/// Merges the command line with the config file into a validated plan.
pub(super) fn build_plan(args: LoadherdArgs) -> AppResult<RunPlan> {
    let file = load_config(args.config.as_deref())?;
    match args.command {
        Command::Console(console) => Ok(RunPlan::Console(resolve_console(
            &console,
            file.as_ref(),
        )?)),
        Command::Agent(agent) => Ok(RunPlan::Agent(resolve_agent(&agent, file.as_ref())?)),
    }
}

pub(super) async fn execute_plan(plan: RunPlan) -> AppResult<()> {
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);

    let result = match plan {
        RunPlan::Console(config) => run_console(&config, &shutdown_tx, shutdown_rx).await,
        RunPlan::Agent(config) => run_agent(&config, shutdown_rx).await,
    };

    signal_handle.abort();
    result
}

async fn run_console(
    config: &ConsoleConfig,
    shutdown_tx: &ShutdownSender,
    shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    let console = Arc::new(ConsoleCommunication::start(config).await?);
    for connection_type in [ConnectionType::Control, ConnectionType::Report] {
        if let Some(addr) = console.local_addr(connection_type) {
            info!("Console {} channel listening on {}", connection_type, addr);
        }
    }

    let model = Arc::new(ConsoleModel::new());
    console.add_message_handler(Arc::clone(&model) as Arc<dyn MessageHandler>);

    let starter = config.start_workers.then(|| {
        spawn_start_when_connected(
            Arc::clone(&console),
            config.status_interval,
            shutdown_tx.subscribe(),
        )
    });

    let result = console.run(shutdown_rx).await;
    if let Some(starter) = starter {
        starter.abort();
    }

    for (number, totals) in model.totals() {
        info!(
            "Test {} ({}): {} succeeded, {} failed, {}ms total",
            number, totals.description, totals.successes, totals.errors, totals.total_time_ms
        );
    }
    result
}

/// Starts the workers once the first agent has connected.
fn spawn_start_when_connected(
    console: Arc<ConsoleCommunication>,
    poll: Duration,
    mut shutdown: ShutdownReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {
                    if console.connected_agents() > 0 {
                        break;
                    }
                }
            }
        }
        match console.start_workers(StartWorkersMessage::default()).await {
            Ok(report) => info!(
                "Start sent to {} of {} agent(s)",
                report.delivered.len(),
                report.attempted()
            ),
            Err(err) => warn!("Failed to start workers: {}", err),
        }
    })
}
