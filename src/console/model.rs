use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::protocol::{TestDescriptor, TestStatisticsDelta, WireMessage};

use super::MessageHandler;

/// Accumulated totals for one test across every worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestTotals {
    pub description: String,
    pub successes: u64,
    pub errors: u64,
    pub total_time_ms: u64,
}

impl TestTotals {
    fn add(&mut self, delta: &TestStatisticsDelta) {
        self.successes = self.successes.saturating_add(delta.successes);
        self.errors = self.errors.saturating_add(delta.errors);
        self.total_time_ms = self.total_time_ms.saturating_add(delta.total_time_ms);
    }
}

/// Console-side record of registered tests and their reported counters.
#[derive(Debug, Default)]
pub struct ConsoleModel {
    tests: Mutex<BTreeMap<u32, TestTotals>>,
}

impl ConsoleModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tests(&self, tests: &[TestDescriptor]) {
        let mut known = self.tests.lock();
        for test in tests {
            known.entry(test.number).or_insert_with(|| {
                info!("Test {} registered: {}", test.number, test.description);
                TestTotals {
                    description: test.description.clone(),
                    ..TestTotals::default()
                }
            });
        }
    }

    /// Adds reported counters. Deltas for tests that were never registered
    /// are kept under an empty description.
    pub fn add_test_report(&self, deltas: &[TestStatisticsDelta]) {
        let mut known = self.tests.lock();
        for delta in deltas {
            known.entry(delta.test).or_default().add(delta);
        }
        debug!("Applied {} statistics deltas", deltas.len());
    }

    #[must_use]
    pub fn totals(&self) -> BTreeMap<u32, TestTotals> {
        self.tests.lock().clone()
    }
}

impl MessageHandler for ConsoleModel {
    fn handle(&self, message: &WireMessage) -> bool {
        match message {
            WireMessage::RegisterTests(register) => {
                self.register_tests(&register.tests);
                true
            }
            WireMessage::ReportStatistics(report) => {
                self.add_test_report(&report.deltas);
                true
            }
            WireMessage::StartWorkers(_)
            | WireMessage::ResetWorkers
            | WireMessage::StopWorkers
            | WireMessage::AgentReport(_)
            | WireMessage::WorkerReport(_)
            | WireMessage::Error(_) => false,
        }
    }
}
