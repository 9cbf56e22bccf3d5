use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{AppError, AppResult};

use super::pool::Resource;

/// Upper bound for anything a test expects to happen promptly.
pub(crate) const PROMPT: Duration = Duration::from_secs(2);
/// How long a test waits before concluding that a call is blocked.
pub(crate) const SETTLE: Duration = Duration::from_millis(50);

pub(crate) fn run_async_test<F>(future: F) -> AppResult<()>
where
    F: Future<Output = AppResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()?;
    runtime.block_on(future)
}

/// Awaits `future`, failing the test if it takes longer than [`PROMPT`].
pub(crate) async fn promptly<F, T>(future: F, what: &'static str) -> AppResult<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(PROMPT, future)
        .await
        .map_err(|_elapsed| AppError::communication(what))
}

#[derive(Debug, Default)]
pub(crate) struct TestResource {
    pub(crate) name: &'static str,
    pub(crate) closed: AtomicBool,
    pub(crate) holders: AtomicUsize,
}

impl TestResource {
    pub(crate) fn named(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Records a holder entering; returns `false` if someone else was
    /// already inside.
    pub(crate) fn enter(&self) -> bool {
        self.holders.fetch_add(1, Ordering::SeqCst) == 0
    }

    pub(crate) fn leave(&self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Resource for TestResource {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
