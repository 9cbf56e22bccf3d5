use std::net::SocketAddr;
use std::num::{NonZeroU16, NonZeroU32, NonZeroUsize};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use super::parsers::{
    parse_duration_arg, parse_positive_u16, parse_positive_u32, parse_positive_usize,
    parse_socket_addr,
};

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the console: accept agents, track their status and send them commands
    Console(ConsoleArgs),
    /// Run an agent that connects to a console and supervises workers
    Agent(AgentArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct ConsoleArgs {
    /// Address agents connect to for control messages
    #[arg(long = "control-listen", value_parser = parse_socket_addr)]
    pub control_listen: Option<SocketAddr>,

    /// Address agents and workers send reports to
    #[arg(long = "report-listen", value_parser = parse_socket_addr)]
    pub report_listen: Option<SocketAddr>,

    /// Kernel threads used to write broadcasts to agents
    #[arg(long = "sender-threads", value_parser = parse_positive_usize)]
    pub sender_threads: Option<NonZeroUsize>,

    /// Reader tasks polling agent report connections
    #[arg(long = "receiver-threads", value_parser = parse_positive_usize)]
    pub receiver_threads: Option<NonZeroUsize>,

    /// Interval between process status updates (supports ms/s/m/h)
    #[arg(long = "status-interval", value_parser = parse_duration_arg)]
    pub status_interval: Option<Duration>,

    /// Broadcast a start command to every agent once one has connected
    #[arg(long = "start-workers")]
    pub start_workers: bool,
}

#[derive(Debug, Args, Clone, Default)]
pub struct AgentArgs {
    /// Console control address to connect to
    #[arg(long = "console-control", value_parser = parse_socket_addr)]
    pub console_control: Option<SocketAddr>,

    /// Console report address to connect to
    #[arg(long = "console-report", value_parser = parse_socket_addr)]
    pub console_report: Option<SocketAddr>,

    /// Agent name shown by the console
    #[arg(long = "name")]
    pub name: Option<String>,

    /// Number of worker processes to supervise
    #[arg(long = "workers", value_parser = parse_positive_u32)]
    pub workers: Option<NonZeroU32>,

    /// Threads each worker runs
    #[arg(long = "threads", value_parser = parse_positive_u16)]
    pub threads: Option<NonZeroU16>,

    /// Interval between status reports (supports ms/s/m/h)
    #[arg(long = "report-interval", value_parser = parse_duration_arg)]
    pub report_interval: Option<Duration>,
}

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Distributed load-generation harness: one console coordinating many agents over TCP."
)]
pub struct LoadherdArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (sets log level to debug unless overridden by LOADHERD_LOG/RUST_LOG)
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Disable colored log output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Path to config file (TOML/JSON). Defaults to ./loadherd.toml or ./loadherd.json if present.
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<String>,
}
