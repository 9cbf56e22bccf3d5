use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::protocol::TestStatisticsDelta;

/// Counters for one test, shared by every thread invoking it.
#[derive(Debug, Default)]
pub struct TestStatistics {
    successes: AtomicU64,
    errors: AtomicU64,
    total_time_ms: AtomicU64,
}

impl TestStatistics {
    pub fn record(&self, succeeded: bool, elapsed: Duration) {
        let counter = if succeeded {
            &self.successes
        } else {
            &self.errors
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.total_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Resets the counters, returning what they held. `None` when nothing
    /// was recorded since the last call.
    pub fn take_delta(&self, test: u32) -> Option<TestStatisticsDelta> {
        let delta = TestStatisticsDelta {
            test,
            successes: self.successes.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
            total_time_ms: self.total_time_ms.swap(0, Ordering::Relaxed),
        };
        if delta.successes == 0 && delta.errors == 0 {
            return None;
        }
        Some(delta)
    }
}
