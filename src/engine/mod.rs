//! Worker-side test registration and instrumentation.
mod registry;
mod statistics;
mod target;

#[cfg(test)]
mod tests;

pub use registry::{TestData, TestRegistry};
pub use statistics::TestStatistics;
pub use target::{InstrumentedTarget, InvokeResult, Invokeable, TestTarget};
