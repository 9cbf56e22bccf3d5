use std::num::{NonZeroU16, NonZeroU32};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::communication::ConnectionType;
use crate::communication::test_support::{promptly, run_async_test};
use crate::config::{loopback_agent_config, loopback_console_config};
use crate::console::{ConsoleCommunication, ConsoleModel, MessageHandler};
use crate::engine::{InvokeResult, TestTarget};
use crate::error::{AppError, AppResult};
use crate::protocol::{
    AgentIdentity, ProcessState, RegisterTestsMessage, StartWorkersMessage, TestDescriptor,
    WireMessage,
};
use crate::shutdown_handlers::shutdown_channel;

use super::{Agent, WorkerCommand, WorkerSet};

fn worker_set() -> AppResult<WorkerSet> {
    Ok(WorkerSet::new(
        AgentIdentity {
            id: "rack-1-42".to_owned(),
            name: "rack-1".to_owned(),
        },
        NonZeroU32::new(3).ok_or_else(|| AppError::communication("zero"))?,
        NonZeroU16::new(4).ok_or_else(|| AppError::communication("zero"))?,
    ))
}

fn states(workers: &WorkerSet) -> Vec<ProcessState> {
    workers.reports().iter().map(|report| report.state).collect()
}

#[test]
fn commands_move_every_worker() -> AppResult<()> {
    let mut workers = worker_set()?;
    if workers.agent_state() != ProcessState::Started {
        return Err(AppError::communication("new workers should be started"));
    }

    workers.apply(&WorkerCommand::Start(StartWorkersMessage::default()));
    if states(&workers) != [ProcessState::Running; 3]
        || workers.agent_state() != ProcessState::Running
    {
        return Err(AppError::communication("start should run every worker"));
    }

    workers.apply(&WorkerCommand::Reset);
    if states(&workers) != [ProcessState::Started; 3] {
        return Err(AppError::communication("reset should restart every worker"));
    }

    workers.apply(&WorkerCommand::Stop);
    if workers.agent_state() != ProcessState::Finished {
        return Err(AppError::communication("stop should finish the agent"));
    }
    Ok(())
}

#[test]
fn worker_reports_carry_identity_and_threads() -> AppResult<()> {
    let mut workers = worker_set()?;
    workers.apply(&WorkerCommand::Start(StartWorkersMessage::default()));
    let reports = workers.reports();

    let names: Vec<(&str, u32)> = reports
        .iter()
        .map(|report| (report.identity.name.as_str(), report.identity.number))
        .collect();
    if names != [("rack-1-0", 0), ("rack-1-1", 1), ("rack-1-2", 2)] {
        return Err(AppError::communication(format!("unexpected workers {names:?}")));
    }
    if reports.iter().any(|report| {
        report.identity.agent_id != "rack-1-42"
            || report.running_threads != 4
            || report.maximum_threads != 4
    }) {
        return Err(AppError::communication(format!("unexpected reports {reports:?}")));
    }
    Ok(())
}

#[test]
fn only_worker_commands_are_extracted() -> AppResult<()> {
    if WorkerCommand::from_message(WireMessage::StopWorkers) != Some(WorkerCommand::Stop) {
        return Err(AppError::communication("stop not recognised"));
    }
    let report = WireMessage::RegisterTests(RegisterTestsMessage { tests: vec![] });
    if WorkerCommand::from_message(report).is_some() {
        return Err(AppError::communication("reports are not commands"));
    }
    Ok(())
}

async fn connected(console: &ConsoleCommunication) -> AppResult<Agent> {
    let control = console
        .local_addr(ConnectionType::Control)
        .ok_or_else(|| AppError::communication("control not bound"))?;
    let report = console
        .local_addr(ConnectionType::Report)
        .ok_or_else(|| AppError::communication("report not bound"))?;
    Agent::connect(&loopback_agent_config(control, report)?).await
}

/// Processes console messages until `done` holds.
async fn process_until(
    console: &ConsoleCommunication,
    what: &'static str,
    done: impl Fn(&ConsoleCommunication) -> bool,
) -> AppResult<()> {
    promptly(
        async {
            while !done(console) {
                console.process_one_message().await?;
            }
            Ok::<(), AppError>(())
        },
        what,
    )
    .await?
}

fn agent_state(console: &ConsoleCommunication) -> Option<(ProcessState, Vec<ProcessState>)> {
    console.process_status().snapshot().first().map(|entry| {
        (
            entry.agent.state,
            entry.workers.iter().map(|worker| worker.state).collect(),
        )
    })
}

#[test]
fn agent_follows_console_commands_and_reports_statistics() -> AppResult<()> {
    run_async_test(async {
        let console = ConsoleCommunication::start(&loopback_console_config()?).await?;
        let model = Arc::new(ConsoleModel::new());
        console.add_message_handler(Arc::clone(&model) as Arc<dyn MessageHandler>);

        let agent = connected(&console).await?;
        let invokable = agent
            .registry()
            .register(TestDescriptor {
                number: 7,
                description: "invocation counter".to_owned(),
            })
            .await?
            .wrap(TestTarget::Function(Arc::new(|| -> InvokeResult { Ok(Value::Null) })))?;
        invokable.invoke()?;
        invokable.invoke()?;

        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let running = tokio::spawn(agent.run(shutdown_rx));

        process_until(&console, "agent connection", |console| {
            console.connected_agents() == 1
        })
        .await?;
        console.start_workers(StartWorkersMessage::default()).await?;
        process_until(&console, "running workers", |console| {
            agent_state(console)
                == Some((
                    ProcessState::Running,
                    vec![ProcessState::Running, ProcessState::Running],
                ))
        })
        .await?;
        process_until(&console, "test statistics", |_console| {
            model.totals().get(&7).is_some_and(|totals| totals.successes == 2)
        })
        .await?;

        let _receivers = shutdown_tx.send(());
        promptly(running, "agent exit").await???;
        process_until(&console, "final report", |console| {
            agent_state(console).is_some_and(|(state, _)| state == ProcessState::Finished)
        })
        .await?;

        console.shutdown();
        Ok(())
    })
}

#[test]
fn agent_stops_when_the_console_goes_away() -> AppResult<()> {
    run_async_test(async {
        let console = ConsoleCommunication::start(&loopback_console_config()?).await?;
        let control = console
            .local_addr(ConnectionType::Control)
            .ok_or_else(|| AppError::communication("control not bound"))?;
        let report = console
            .local_addr(ConnectionType::Report)
            .ok_or_else(|| AppError::communication("report not bound"))?;
        let mut config = loopback_agent_config(control, report)?;
        config.report_interval = Duration::from_secs(60);
        let agent = Agent::connect(&config).await?;

        let (_shutdown_tx, shutdown_rx) = shutdown_channel();
        let running = tokio::spawn(agent.run(shutdown_rx));
        promptly(
            async {
                while console.connected_agents() != 1 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            },
            "agent connection",
        )
        .await?;

        console.shutdown();
        promptly(running, "agent exit").await???;
        Ok(())
    })
}
