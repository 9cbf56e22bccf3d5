//! Configuration loading and resolution.
mod loader;
mod resolve;
pub mod types;

#[cfg(test)]
mod test_support;

pub use loader::load_config;
pub use resolve::{AgentConfig, ConsoleConfig, resolve_agent, resolve_console};

#[cfg(test)]
pub(crate) use test_support::{load_config_file, loopback_agent_config, loopback_console_config};
