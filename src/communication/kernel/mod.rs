//! Fixed-size pool of worker tasks used to parallelise per-peer work.
//!
//! Submission is non-blocking ([`Kernel::execute`]) or waits for queue space
//! ([`Kernel::execute_when_ready`]). The job queue is bounded: a full queue
//! either rejects the job with [`CommunicationError::QueueFull`] or applies
//! backpressure to the submitter, never grows without limit.
use std::any::Any;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, CommunicationError, Component};

#[cfg(test)]
mod tests;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type JobReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>;

fn kernel_shutdown() -> AppError {
    AppError::communication(CommunicationError::Shutdown {
        component: Component::Kernel,
    })
}

pub struct Kernel {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    stop_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
    capacity: usize,
}

impl Kernel {
    /// Starts `threads` workers sharing a job queue of `queue_capacity`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(threads: NonZeroUsize, queue_capacity: NonZeroUsize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.get());
        let receiver: JobReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let (stop_tx, _) = watch::channel(false);

        let workers = (0..threads.get())
            .map(|index| {
                tokio::spawn(run_worker(
                    index,
                    Arc::clone(&receiver),
                    stop_tx.subscribe(),
                ))
            })
            .collect();
        debug!(
            "Kernel started with {} workers (queue capacity {})",
            threads, queue_capacity
        );

        Self {
            sender: Mutex::new(Some(sender)),
            stop_tx,
            workers: Mutex::new(workers),
            threads: threads.get(),
            capacity: queue_capacity.get(),
        }
    }

    /// Queues `task` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::QueueFull`] when the job queue is at
    /// capacity and [`CommunicationError::Shutdown`] after shutdown.
    pub fn execute<F, T>(&self, task: F) -> AppResult<TaskHandle<T>>
    where
        F: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = wrap_task(task);
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(kernel_shutdown());
        };
        match sender.try_send(job) {
            Ok(()) => Ok(handle),
            Err(TrySendError::Full(_job)) => Err(AppError::communication(
                CommunicationError::QueueFull {
                    capacity: self.capacity,
                },
            )),
            Err(TrySendError::Closed(_job)) => Err(kernel_shutdown()),
        }
    }

    /// Queues `task`, waiting for space in the job queue if it is full.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Shutdown`] if the kernel is, or
    /// becomes, shut down before the job is queued.
    pub async fn execute_when_ready<F, T>(&self, task: F) -> AppResult<TaskHandle<T>>
    where
        F: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = wrap_task(task);
        let sender = self.sender.lock().clone().ok_or_else(kernel_shutdown)?;
        sender.send(job).await.map_err(|_err| kernel_shutdown())?;
        Ok(handle)
    }

    /// Stops accepting work. Running jobs complete; queued jobs are
    /// abandoned. Idempotent.
    pub fn shutdown(&self) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        drop(sender);
        self.stop_tx.send_replace(true);
        debug!("Kernel shut down");
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Waits for every worker to exit. Only meaningful after
    /// [`Kernel::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns an error if a worker task could not be joined.
    pub async fn await_termination(&self) -> AppResult<()> {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            worker.await?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn threads(&self) -> usize {
        self.threads
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Completion handle for one kernel job.
#[derive(Debug)]
pub struct TaskHandle<T> {
    result_rx: oneshot::Receiver<AppResult<T>>,
}

impl<T> TaskHandle<T> {
    /// Waits for the job and returns its result.
    ///
    /// # Errors
    ///
    /// Returns the job's own error, [`CommunicationError::TaskPanicked`] if
    /// it panicked, or [`CommunicationError::TaskAbandoned`] if the kernel
    /// shut down before running it.
    pub async fn join(self) -> AppResult<T> {
        self.result_rx
            .await
            .map_err(|_err| AppError::communication(CommunicationError::TaskAbandoned))?
    }
}

fn wrap_task<F, T>(task: F) -> (Job, TaskHandle<T>)
where
    F: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let (result_tx, result_rx) = oneshot::channel();
    let job: Job = Box::pin(async move {
        let outcome = match AssertUnwindSafe(task).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(AppError::communication(
                CommunicationError::TaskPanicked {
                    message: panic_message(payload.as_ref()),
                },
            )),
        };
        if let Err(err) = &outcome {
            warn!("Kernel task failed: {}", err);
        }
        if result_tx.send(outcome).is_err() {
            debug!("Kernel task finished after its handle was dropped");
        }
    });
    (job, TaskHandle { result_rx })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

async fn run_worker(index: usize, receiver: JobReceiver, mut stop_rx: watch::Receiver<bool>) {
    loop {
        let next = {
            let mut jobs = receiver.lock().await;
            tokio::select! {
                biased;
                _ = stop_rx.wait_for(|stopped| *stopped) => None,
                job = jobs.recv() => job,
            }
        };
        let Some(job) = next else {
            break;
        };
        job.await;
    }
    debug!("Kernel worker {} stopped", index);
}
