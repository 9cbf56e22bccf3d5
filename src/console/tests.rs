use std::sync::Arc;
use std::time::Duration;

use crate::communication::test_support::{SETTLE, promptly, run_async_test};
use crate::communication::{ClientReceiver, ClientSender, ConnectionType, Connector, Sender};
use crate::config::loopback_console_config;
use crate::error::{AppError, AppResult};
use crate::protocol::{
    AgentIdentity, AgentProcessReport, ProcessState, RegisterTestsMessage, ReportStatisticsMessage,
    StartWorkersMessage, TestDescriptor, TestStatisticsDelta, WireMessage,
};
use crate::shutdown_handlers::shutdown_channel;

use super::{ConsoleCommunication, ConsoleModel, MessageHandler};

fn connector(console: &ConsoleCommunication, connection_type: ConnectionType) -> AppResult<Connector> {
    let addr = console
        .local_addr(connection_type)
        .ok_or_else(|| AppError::communication("listener not bound"))?;
    Ok(Connector::new(addr, connection_type))
}

async fn wait_for_agents(console: &ConsoleCommunication, count: usize) -> AppResult<()> {
    promptly(
        async {
            while console.connected_agents() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        },
        "agent connections",
    )
    .await
}

#[test]
fn reports_update_status_and_reach_handlers() -> AppResult<()> {
    run_async_test(async {
        let console = ConsoleCommunication::start(&loopback_console_config()?).await?;
        let model = Arc::new(ConsoleModel::new());
        console.add_message_handler(Arc::clone(&model) as Arc<dyn MessageHandler>);

        let agent = ClientSender::connect(&connector(&console, ConnectionType::Report)?).await?;
        agent
            .send(&WireMessage::AgentReport(AgentProcessReport {
                identity: AgentIdentity {
                    id: "a-1".to_owned(),
                    name: "rack-1".to_owned(),
                },
                state: ProcessState::Running,
            }))
            .await?;
        agent
            .send(&WireMessage::RegisterTests(RegisterTestsMessage {
                tests: vec![TestDescriptor {
                    number: 1,
                    description: "home page".to_owned(),
                }],
            }))
            .await?;
        agent
            .send(&WireMessage::ReportStatistics(ReportStatisticsMessage {
                deltas: vec![TestStatisticsDelta {
                    test: 1,
                    successes: 4,
                    errors: 1,
                    total_time_ms: 50,
                }],
            }))
            .await?;

        for _ in 0..3 {
            if !promptly(console.process_one_message(), "inbound message").await?? {
                return Err(AppError::communication("receiver stopped early"));
            }
        }

        let snapshot = console.process_status().snapshot();
        let agents: Vec<(&str, ProcessState)> = snapshot
            .iter()
            .map(|entry| (entry.agent.identity.name.as_str(), entry.agent.state))
            .collect();
        if agents != [("rack-1", ProcessState::Running)] {
            return Err(AppError::communication(format!("unexpected agents {agents:?}")));
        }
        let totals = model.totals();
        let home = totals
            .get(&1)
            .ok_or_else(|| AppError::communication("test 1 not registered"))?;
        if home.description != "home page" || home.successes != 4 || home.errors != 1 {
            return Err(AppError::communication(format!("unexpected totals {home:?}")));
        }
        console.shutdown();
        Ok(())
    })
}

#[test]
fn control_broadcast_reaches_every_agent() -> AppResult<()> {
    run_async_test(async {
        let console = ConsoleCommunication::start(&loopback_console_config()?).await?;
        let control = connector(&console, ConnectionType::Control)?;
        let first: ClientReceiver<WireMessage> = ClientReceiver::connect(&control).await?;
        let second: ClientReceiver<WireMessage> = ClientReceiver::connect(&control).await?;
        wait_for_agents(&console, 2).await?;

        let report = promptly(console.stop_workers(), "stop broadcast").await??;
        if report.delivered.len() != 2 || !report.is_complete() {
            return Err(AppError::communication(format!("unexpected report {report:?}")));
        }
        for receiver in [&first, &second] {
            let received = promptly(receiver.wait_for_message(), "control message").await??;
            if received != Some(WireMessage::StopWorkers) {
                return Err(AppError::communication(format!(
                    "unexpected control message {received:?}"
                )));
            }
        }
        console.shutdown();
        Ok(())
    })
}

#[test]
fn departed_agents_are_pruned() -> AppResult<()> {
    run_async_test(async {
        let console = ConsoleCommunication::start(&loopback_console_config()?).await?;
        let control = connector(&console, ConnectionType::Control)?;
        let staying = control.connect().await?;
        let leaving = control.connect().await?;
        wait_for_agents(&console, 2).await?;

        drop(leaving);
        tokio::time::sleep(SETTLE).await;

        if !promptly(console.prune_disconnected_agents(), "prune").await?? {
            return Err(AppError::communication("expected a departed agent"));
        }
        if console.connected_agents() != 1 {
            return Err(AppError::communication(format!(
                "expected one agent left, found {}",
                console.connected_agents()
            )));
        }
        drop(staying);
        console.shutdown();
        Ok(())
    })
}

#[test]
fn run_returns_when_shutdown_fires() -> AppResult<()> {
    run_async_test(async {
        let console = Arc::new(ConsoleCommunication::start(&loopback_console_config()?).await?);
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let running = {
            let console = Arc::clone(&console);
            tokio::spawn(async move { console.run(shutdown_rx).await })
        };
        tokio::time::sleep(SETTLE).await;
        let _receivers = shutdown_tx.send(());
        promptly(running, "console run").await???;

        if console.start_workers(StartWorkersMessage::default()).await.is_ok() {
            return Err(AppError::communication("console still accepts broadcasts"));
        }
        Ok(())
    })
}
