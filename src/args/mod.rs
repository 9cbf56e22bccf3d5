//! CLI argument types and parsing helpers.
mod cli;
mod defaults;
pub(crate) mod parsers;


pub use cli::{AgentArgs, Command, ConsoleArgs, LoadherdArgs};
pub(crate) use defaults::{
    DEFAULT_AGENT_NAME, DEFAULT_CONTROL_ADDR, DEFAULT_POLL_INTERVAL, DEFAULT_PURGE_AFTER_CYCLES,
    DEFAULT_RECEIVER_THREADS, DEFAULT_REPORT_ADDR, DEFAULT_REPORT_INTERVAL,
    DEFAULT_SENDER_QUEUE_CAPACITY, DEFAULT_SENDER_THREADS, DEFAULT_STATUS_INTERVAL,
    DEFAULT_THREADS_PER_WORKER, DEFAULT_WORKERS,
};
