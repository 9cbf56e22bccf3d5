use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::num::{NonZeroU16, NonZeroU32, NonZeroUsize};
use std::time::Duration;

use crate::args::{
    AgentArgs, ConsoleArgs, DEFAULT_AGENT_NAME, DEFAULT_CONTROL_ADDR, DEFAULT_POLL_INTERVAL,
    DEFAULT_PURGE_AFTER_CYCLES, DEFAULT_RECEIVER_THREADS, DEFAULT_REPORT_ADDR,
    DEFAULT_REPORT_INTERVAL, DEFAULT_SENDER_QUEUE_CAPACITY, DEFAULT_SENDER_THREADS,
    DEFAULT_STATUS_INTERVAL, DEFAULT_THREADS_PER_WORKER, DEFAULT_WORKERS,
};
use crate::communication::{ConnectionType, ReceiverConfig, SenderConfig};
use crate::console::StatusConfig;
use crate::error::{AppError, AppResult, ConfigError, ValidationError};

use super::types::{AgentSection, ConfigFile, ConsoleSection, DurationValue};

/// Fully resolved console settings.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub control_listen: SocketAddr,
    pub report_listen: SocketAddr,
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
    pub status: StatusConfig,
    pub status_interval: Duration,
    pub start_workers: bool,
}

impl ConsoleConfig {
    #[must_use]
    pub fn bindings(&self) -> BTreeMap<ConnectionType, SocketAddr> {
        BTreeMap::from([
            (ConnectionType::Control, self.control_listen),
            (ConnectionType::Report, self.report_listen),
        ])
    }
}

/// Fully resolved agent settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub console_control: SocketAddr,
    pub console_report: SocketAddr,
    pub name: String,
    pub workers: NonZeroU32,
    pub threads: NonZeroU16,
    pub report_interval: Duration,
}

/// Merges CLI flags over the `[console]` section over built-in defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] naming the offending field when a value is
/// invalid, or when both listeners share one fixed address.
pub fn resolve_console(args: &ConsoleArgs, file: Option<&ConfigFile>) -> AppResult<ConsoleConfig> {
    let empty = ConsoleSection::default();
    let section = file.and_then(|file| file.console.as_ref()).unwrap_or(&empty);

    let control_listen = pick_addr(
        args.control_listen,
        section.control_listen.as_deref(),
        "console.control_listen",
        DEFAULT_CONTROL_ADDR,
    )?;
    let report_listen = pick_addr(
        args.report_listen,
        section.report_listen.as_deref(),
        "console.report_listen",
        DEFAULT_REPORT_ADDR,
    )?;
    if control_listen == report_listen && control_listen.port() != 0 {
        return Err(AppError::config(ConfigError::SharedListenAddress {
            left: "console.control_listen",
            right: "console.report_listen",
        }));
    }

    let sender = SenderConfig {
        threads: pick_usize(
            args.sender_threads,
            section.sender_threads,
            "console.sender_threads",
            DEFAULT_SENDER_THREADS,
        )?,
        queue_capacity: pick_usize(
            None,
            section.sender_queue_capacity,
            "console.sender_queue_capacity",
            DEFAULT_SENDER_QUEUE_CAPACITY,
        )?,
    };
    let receiver = ReceiverConfig {
        threads: pick_usize(
            args.receiver_threads,
            section.receiver_threads,
            "console.receiver_threads",
            DEFAULT_RECEIVER_THREADS,
        )?,
        poll_interval: pick_duration(
            None,
            section.poll_interval.as_ref(),
            "console.poll_interval",
            DEFAULT_POLL_INTERVAL,
        )?,
    };
    let purge_after_cycles = NonZeroU32::new(
        section
            .purge_after_cycles
            .unwrap_or(DEFAULT_PURGE_AFTER_CYCLES),
    )
    .ok_or_else(|| must_be_positive("console.purge_after_cycles"))?;

    Ok(ConsoleConfig {
        control_listen,
        report_listen,
        sender,
        receiver,
        status: StatusConfig { purge_after_cycles },
        status_interval: pick_duration(
            args.status_interval,
            section.status_interval.as_ref(),
            "console.status_interval",
            DEFAULT_STATUS_INTERVAL,
        )?,
        start_workers: args.start_workers,
    })
}

/// Merges CLI flags over the `[agent]` section over built-in defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] naming the offending field when a value is
/// invalid.
pub fn resolve_agent(args: &AgentArgs, file: Option<&ConfigFile>) -> AppResult<AgentConfig> {
    let empty = AgentSection::default();
    let section = file.and_then(|file| file.agent.as_ref()).unwrap_or(&empty);

    let workers = args.workers.map_or_else(
        || {
            NonZeroU32::new(section.workers.unwrap_or(DEFAULT_WORKERS))
                .ok_or_else(|| must_be_positive("agent.workers"))
        },
        Ok,
    )?;
    let threads = args.threads.map_or_else(
        || {
            NonZeroU16::new(section.threads.unwrap_or(DEFAULT_THREADS_PER_WORKER))
                .ok_or_else(|| must_be_positive("agent.threads"))
        },
        Ok,
    )?;

    Ok(AgentConfig {
        console_control: pick_addr(
            args.console_control,
            section.console_control.as_deref(),
            "agent.console_control",
            DEFAULT_CONTROL_ADDR,
        )?,
        console_report: pick_addr(
            args.console_report,
            section.console_report.as_deref(),
            "agent.console_report",
            DEFAULT_REPORT_ADDR,
        )?,
        name: args
            .name
            .clone()
            .or_else(|| section.name.clone())
            .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_owned()),
        workers,
        threads,
        report_interval: pick_duration(
            args.report_interval,
            section.report_interval.as_ref(),
            "agent.report_interval",
            DEFAULT_REPORT_INTERVAL,
        )?,
    })
}

fn must_be_positive(field: &'static str) -> AppError {
    AppError::config(ConfigError::FieldMustBePositive {
        field,
        source: ValidationError::ValueTooSmall { min: 1 },
    })
}

fn pick_addr(
    cli: Option<SocketAddr>,
    file: Option<&str>,
    field: &'static str,
    default: &str,
) -> AppResult<SocketAddr> {
    if let Some(addr) = cli {
        return Ok(addr);
    }
    let text = file.unwrap_or(default);
    text.trim().parse().map_err(|err| {
        AppError::config(ConfigError::InvalidAddress {
            field,
            source: ValidationError::InvalidSocketAddr {
                value: text.to_owned(),
                source: err,
            },
        })
    })
}

fn pick_usize(
    cli: Option<NonZeroUsize>,
    file: Option<usize>,
    field: &'static str,
    default: usize,
) -> AppResult<NonZeroUsize> {
    if let Some(value) = cli {
        return Ok(value);
    }
    NonZeroUsize::new(file.unwrap_or(default)).ok_or_else(|| must_be_positive(field))
}

fn pick_duration(
    cli: Option<Duration>,
    file: Option<&DurationValue>,
    field: &'static str,
    default: Duration,
) -> AppResult<Duration> {
    if let Some(duration) = cli {
        return Ok(duration);
    }
    file.map_or(Ok(default), |value| {
        value
            .to_duration()
            .map_err(|err| AppError::config(ConfigError::InvalidDuration { field, source: err }))
    })
}
