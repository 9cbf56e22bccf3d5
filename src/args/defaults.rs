use std::time::Duration;

/// Console port agents send control traffic through.
pub(crate) const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:6372";
/// Console port agents and workers report to.
pub(crate) const DEFAULT_REPORT_ADDR: &str = "127.0.0.1:6373";

pub(crate) const DEFAULT_SENDER_THREADS: usize = 4;
pub(crate) const DEFAULT_SENDER_QUEUE_CAPACITY: usize = 256;
pub(crate) const DEFAULT_RECEIVER_THREADS: usize = 2;
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub(crate) const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_millis(500);
pub(crate) const DEFAULT_PURGE_AFTER_CYCLES: u32 = 5;

pub(crate) const DEFAULT_AGENT_NAME: &str = "agent";
pub(crate) const DEFAULT_WORKERS: u32 = 1;
pub(crate) const DEFAULT_THREADS_PER_WORKER: u16 = 1;
pub(crate) const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(500);
