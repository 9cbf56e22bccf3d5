//! Core library for the `loadherd` CLI.
//!
//! A console process fans control messages out to many agent processes and
//! collects their process and statistics reports over TCP. The building
//! blocks (resource pool, kernel, acceptor, fan-out sender, message queue)
//! live in [`communication`]; the console and agent roles are assembled on
//! top of them.
pub mod agent;
pub mod args;
pub mod communication;
pub mod config;
pub mod console;
pub mod engine;
pub mod entry;
pub mod error;
pub mod protocol;
pub mod shutdown;
pub mod shutdown_handlers;
pub mod system;
