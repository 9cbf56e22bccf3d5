use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::communication::Sender;
use crate::error::AppResult;
use crate::protocol::{
    RegisterTestsMessage, ReportStatisticsMessage, TestDescriptor, WireMessage,
};

use super::statistics::TestStatistics;
use super::target::{InstrumentedTarget, TestTarget};

/// A registered test and its statistics.
#[derive(Debug)]
pub struct TestData {
    descriptor: TestDescriptor,
    statistics: TestStatistics,
}

impl TestData {
    #[must_use]
    pub const fn descriptor(&self) -> &TestDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub const fn statistics(&self) -> &TestStatistics {
        &self.statistics
    }

    /// Instruments `target` with this test.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::NotInvokeable`] for a
    /// [`TestTarget::Value`].
    pub fn wrap(self: &Arc<Self>, target: TestTarget) -> AppResult<InstrumentedTarget> {
        InstrumentedTarget::resolve(Arc::clone(self), target)
    }
}

/// Tests known to one worker process, keyed by test number.
///
/// Each newly registered test is announced once through the sender.
pub struct TestRegistry {
    sender: Arc<dyn Sender<WireMessage>>,
    tests: Mutex<BTreeMap<u32, Arc<TestData>>>,
}

impl TestRegistry {
    #[must_use]
    pub fn new(sender: Arc<dyn Sender<WireMessage>>) -> Self {
        Self {
            sender,
            tests: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the test registered under `test.number`, registering and
    /// announcing it first if it is new. A known number keeps its original
    /// description.
    ///
    /// # Errors
    ///
    /// Returns an error if announcing a new test fails; the test stays
    /// registered.
    pub async fn register(&self, test: TestDescriptor) -> AppResult<Arc<TestData>> {
        let created = {
            let mut tests = self.tests.lock();
            if let Some(existing) = tests.get(&test.number) {
                return Ok(Arc::clone(existing));
            }
            let created = Arc::new(TestData {
                descriptor: test.clone(),
                statistics: TestStatistics::default(),
            });
            tests.insert(test.number, Arc::clone(&created));
            created
        };

        debug!("Registered test {} ({})", test.number, test.description);
        self.sender
            .send(&WireMessage::RegisterTests(RegisterTestsMessage {
                tests: vec![test],
            }))
            .await?;
        Ok(created)
    }

    #[must_use]
    pub fn get(&self, number: u32) -> Option<Arc<TestData>> {
        self.tests.lock().get(&number).cloned()
    }

    /// Registered tests in number order.
    #[must_use]
    pub fn tests(&self) -> Vec<TestDescriptor> {
        self.tests
            .lock()
            .values()
            .map(|data| data.descriptor.clone())
            .collect()
    }

    /// Drains every test's counters into one report. `None` when nothing
    /// ran since the previous call.
    #[must_use]
    pub fn statistics_delta(&self) -> Option<WireMessage> {
        let deltas: Vec<_> = self
            .tests
            .lock()
            .iter()
            .filter_map(|(number, data)| data.statistics.take_delta(*number))
            .collect();
        if deltas.is_empty() {
            return None;
        }
        Some(WireMessage::ReportStatistics(ReportStatisticsMessage {
            deltas,
        }))
    }
}
