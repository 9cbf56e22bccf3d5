use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    StartWorkers(StartWorkersMessage),
    ResetWorkers,
    StopWorkers,
    AgentReport(AgentProcessReport),
    WorkerReport(WorkerProcessReport),
    RegisterTests(RegisterTestsMessage),
    ReportStatistics(ReportStatisticsMessage),
    Error(ErrorMessage),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWorkersMessage {
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Started,
    Running,
    Connected,
    Finished,
    Disconnected,
    Unknown,
}

impl ProcessState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ProcessState::Started => "started",
            ProcessState::Running => "running",
            ProcessState::Connected => "connected",
            ProcessState::Finished => "finished",
            ProcessState::Disconnected => "disconnected",
            ProcessState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique per agent process.
    pub id: String,
    /// Host-facing name, used for display ordering.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub agent_id: String,
    pub name: String,
    pub number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProcessReport {
    pub identity: AgentIdentity,
    pub state: ProcessState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProcessReport {
    pub identity: WorkerIdentity,
    pub state: ProcessState,
    /// Threads currently executing test runs.
    pub running_threads: u16,
    /// Threads the worker is configured to run.
    pub maximum_threads: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDescriptor {
    pub number: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTestsMessage {
    pub tests: Vec<TestDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStatisticsDelta {
    pub test: u32,
    pub successes: u64,
    pub errors: u64,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStatisticsMessage {
    pub deltas: Vec<TestStatisticsDelta>,
}
