use std::time::Duration;

use serde::Deserialize;

use crate::args::parsers::parse_duration;
use crate::error::ValidationError;

/// On-disk configuration. Every field is optional; CLI flags override it
/// and built-in defaults fill the gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub console: Option<ConsoleSection>,
    pub agent: Option<AgentSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsoleSection {
    pub control_listen: Option<String>,
    pub report_listen: Option<String>,
    pub sender_threads: Option<usize>,
    pub sender_queue_capacity: Option<usize>,
    pub receiver_threads: Option<usize>,
    pub poll_interval: Option<DurationValue>,
    pub status_interval: Option<DurationValue>,
    pub purge_after_cycles: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    pub console_control: Option<String>,
    pub console_report: Option<String>,
    pub name: Option<String>,
    pub workers: Option<u32>,
    pub threads: Option<u16>,
    pub report_interval: Option<DurationValue>,
}

/// A duration given either as whole seconds or as text such as `"250ms"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(0) => Err(ValidationError::DurationZero),
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => parse_duration(text),
        }
    }
}
