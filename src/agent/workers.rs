use std::num::{NonZeroU16, NonZeroU32};

use tracing::{debug, info};

use crate::protocol::{
    AgentIdentity, ProcessState, StartWorkersMessage, WireMessage, WorkerIdentity,
    WorkerProcessReport,
};

/// Control command understood by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    Start(StartWorkersMessage),
    Reset,
    Stop,
}

impl WorkerCommand {
    /// Extracts the command carried by `message`, if it is one.
    #[must_use]
    pub fn from_message(message: WireMessage) -> Option<Self> {
        match message {
            WireMessage::StartWorkers(start) => Some(Self::Start(start)),
            WireMessage::ResetWorkers => Some(Self::Reset),
            WireMessage::StopWorkers => Some(Self::Stop),
            WireMessage::AgentReport(_)
            | WireMessage::WorkerReport(_)
            | WireMessage::RegisterTests(_)
            | WireMessage::ReportStatistics(_)
            | WireMessage::Error(_) => None,
        }
    }

    const fn target_state(&self) -> ProcessState {
        match self {
            Self::Start(_) => ProcessState::Running,
            Self::Reset => ProcessState::Started,
            Self::Stop => ProcessState::Finished,
        }
    }
}

/// The worker processes an agent supervises, numbered from zero.
#[derive(Debug, Clone)]
pub struct WorkerSet {
    agent: AgentIdentity,
    maximum_threads: u16,
    states: Vec<ProcessState>,
}

impl WorkerSet {
    #[must_use]
    pub fn new(agent: AgentIdentity, workers: NonZeroU32, threads: NonZeroU16) -> Self {
        let count = usize::try_from(workers.get()).unwrap_or(usize::MAX);
        Self {
            agent,
            maximum_threads: threads.get(),
            states: vec![ProcessState::Started; count],
        }
    }

    /// Moves every worker to the state `command` asks for.
    pub fn apply(&mut self, command: &WorkerCommand) {
        let state = command.target_state();
        if let WorkerCommand::Start(start) = command {
            debug!("Start properties: {:?}", start.properties);
        }
        info!(
            "{} worker(s) of {} now {}",
            self.states.len(),
            self.agent.name,
            state.as_str()
        );
        self.states.fill(state);
    }

    /// Running while any worker runs, finished once all have finished.
    #[must_use]
    pub fn agent_state(&self) -> ProcessState {
        if self.states.contains(&ProcessState::Running) {
            ProcessState::Running
        } else if self
            .states
            .iter()
            .all(|state| *state == ProcessState::Finished)
        {
            ProcessState::Finished
        } else {
            ProcessState::Started
        }
    }

    #[must_use]
    pub fn reports(&self) -> Vec<WorkerProcessReport> {
        self.states
            .iter()
            .zip(0_u32..)
            .map(|(state, number)| WorkerProcessReport {
                identity: WorkerIdentity {
                    agent_id: self.agent.id.clone(),
                    name: format!("{}-{}", self.agent.name, number),
                    number,
                },
                state: *state,
                running_threads: if *state == ProcessState::Running {
                    self.maximum_threads
                } else {
                    0
                },
                maximum_threads: self.maximum_threads,
            })
            .collect()
    }
}
