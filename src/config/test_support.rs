use std::net::SocketAddr;
use std::num::{NonZeroU16, NonZeroU32, NonZeroUsize};
use std::path::Path;
use std::time::Duration;

use crate::communication::{ReceiverConfig, SenderConfig};
use crate::console::StatusConfig;
use crate::error::{AppError, AppResult};

use super::loader;
use super::resolve::{AgentConfig, ConsoleConfig};
use super::types::ConfigFile;

pub(crate) fn load_config_file(path: &Path) -> AppResult<ConfigFile> {
    loader::load_config_file(path)
}

/// Console listening on ephemeral loopback ports with short intervals.
pub(crate) fn loopback_console_config() -> AppResult<ConsoleConfig> {
    let two = NonZeroUsize::new(2).ok_or_else(|| AppError::communication("zero"))?;
    let any_port = SocketAddr::from(([127, 0, 0, 1], 0));
    Ok(ConsoleConfig {
        control_listen: any_port,
        report_listen: any_port,
        sender: SenderConfig {
            threads: two,
            queue_capacity: two,
        },
        receiver: ReceiverConfig {
            threads: two,
            poll_interval: Duration::from_millis(20),
        },
        status: StatusConfig {
            purge_after_cycles: NonZeroU32::new(3)
                .ok_or_else(|| AppError::communication("zero"))?,
        },
        status_interval: Duration::from_millis(50),
        start_workers: false,
    })
}

/// Agent with two single-threaded workers reporting every 20ms.
pub(crate) fn loopback_agent_config(
    console_control: SocketAddr,
    console_report: SocketAddr,
) -> AppResult<AgentConfig> {
    Ok(AgentConfig {
        console_control,
        console_report,
        name: "test-agent".to_owned(),
        workers: NonZeroU32::new(2).ok_or_else(|| AppError::communication("zero"))?,
        threads: NonZeroU16::new(1).ok_or_else(|| AppError::communication("zero"))?,
        report_interval: Duration::from_millis(20),
    })
}
