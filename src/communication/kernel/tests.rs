use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::{Barrier, oneshot};

use crate::communication::test_support::{SETTLE, promptly, run_async_test};
use crate::error::{AppError, AppResult, CommunicationError};

use super::Kernel;

fn non_zero(value: usize) -> AppResult<NonZeroUsize> {
    NonZeroUsize::new(value).ok_or_else(|| AppError::communication("Expected a non-zero value"))
}

fn kernel(threads: usize, capacity: usize) -> AppResult<Kernel> {
    Ok(Kernel::new(non_zero(threads)?, non_zero(capacity)?))
}

#[test]
fn runs_jobs_concurrently_on_every_worker() -> AppResult<()> {
    run_async_test(async {
        let kernel = kernel(3, 16)?;
        let barrier = Arc::new(Barrier::new(3));

        let mut handles = Vec::new();
        for index in 0..3_u32 {
            let barrier = Arc::clone(&barrier);
            handles.push(kernel.execute(async move {
                barrier.wait().await;
                Ok(index)
            })?);
        }

        let mut total = 0_u32;
        for handle in handles {
            let value = promptly(handle.join(), "barrier job").await??;
            total = total.saturating_add(value);
        }
        if total != 3 {
            return Err(AppError::communication(format!(
                "Expected job results to sum to 3, got {}",
                total
            )));
        }
        Ok(())
    })
}

#[test]
fn failing_job_does_not_stop_its_worker() -> AppResult<()> {
    run_async_test(async {
        let kernel = kernel(1, 4)?;
        let failing = kernel.execute(async {
            Err::<u32, AppError>(AppError::communication(CommunicationError::ConnectionClosed))
        })?;
        let next = kernel.execute(async { Ok(5_u32) })?;

        match promptly(failing.join(), "failing job").await? {
            Err(AppError::Communication(CommunicationError::ConnectionClosed)) => {}
            Err(err) => return Err(err),
            Ok(_) => return Err(AppError::communication("Expected the job to fail")),
        }
        let value = promptly(next.join(), "job after failure").await??;
        if value != 5 {
            return Err(AppError::communication("Expected the next job to run"));
        }
        Ok(())
    })
}

#[test]
#[expect(clippy::panic, reason = "exercises panic capture in kernel workers")]
fn panicking_job_is_reported_to_its_handle() -> AppResult<()> {
    run_async_test(async {
        let kernel = kernel(1, 4)?;
        let panicking = kernel.execute(async {
            if NonZeroUsize::new(1).is_some() {
                panic!("job blew up");
            }
            Ok(())
        })?;
        let next = kernel.execute(async { Ok("still running") })?;

        match promptly(panicking.join(), "panicking job").await? {
            Err(AppError::Communication(CommunicationError::TaskPanicked { message })) => {
                if !message.contains("job blew up") {
                    return Err(AppError::communication(format!(
                        "Unexpected panic message {}",
                        message
                    )));
                }
            }
            Err(err) => return Err(err),
            Ok(()) => return Err(AppError::communication("Expected a panic report")),
        }
        promptly(next.join(), "job after panic").await??;
        Ok(())
    })
}

#[test]
fn shutdown_is_idempotent_and_rejects_new_jobs() -> AppResult<()> {
    run_async_test(async {
        let kernel = kernel(2, 4)?;
        kernel.shutdown();
        kernel.shutdown();
        if !kernel.is_shutdown() {
            return Err(AppError::communication("Expected kernel to report shutdown"));
        }

        match kernel.execute(async { Ok(()) }) {
            Err(err) if err.is_shutdown() => {}
            Err(err) => return Err(err),
            Ok(_) => return Err(AppError::communication("Expected execute to fail")),
        }
        match kernel.execute_when_ready(async { Ok(()) }).await {
            Err(err) if err.is_shutdown() => {}
            Err(err) => return Err(err),
            Ok(_) => {
                return Err(AppError::communication(
                    "Expected execute_when_ready to fail",
                ));
            }
        }
        promptly(kernel.await_termination(), "worker termination").await??;
        Ok(())
    })
}

#[test]
fn shutdown_finishes_running_job_and_abandons_queued_ones() -> AppResult<()> {
    run_async_test(async {
        let kernel = kernel(1, 4)?;
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let running = kernel.execute(async move {
            drop(started_tx.send(()));
            gate_rx
                .await
                .map_err(|_err| AppError::communication("gate dropped"))?;
            Ok("finished")
        })?;
        promptly(started_rx, "first job start")
            .await?
            .map_err(|_err| AppError::communication("first job never started"))?;
        let queued = kernel.execute(async { Ok("never runs") })?;

        kernel.shutdown();
        drop(gate_tx.send(()));

        let finished = promptly(running.join(), "running job").await??;
        if finished != "finished" {
            return Err(AppError::communication("Expected the running job to finish"));
        }
        match promptly(queued.join(), "queued job").await? {
            Err(AppError::Communication(CommunicationError::TaskAbandoned)) => {}
            Err(err) => return Err(err),
            Ok(_) => return Err(AppError::communication("Expected queued job to be abandoned")),
        }
        promptly(kernel.await_termination(), "worker termination").await??;
        Ok(())
    })
}

#[test]
fn full_queue_rejects_or_waits() -> AppResult<()> {
    run_async_test(async {
        let kernel = kernel(1, 1)?;
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let blocking = kernel.execute(async move {
            drop(started_tx.send(()));
            gate_rx
                .await
                .map_err(|_err| AppError::communication("gate dropped"))?;
            Ok(1_u32)
        })?;
        promptly(started_rx, "blocking job start")
            .await?
            .map_err(|_err| AppError::communication("blocking job never started"))?;
        let queued = kernel.execute(async { Ok(2_u32) })?;

        match kernel.execute(async { Ok(3_u32) }) {
            Err(AppError::Communication(CommunicationError::QueueFull { capacity: 1 })) => {}
            Err(err) => return Err(err),
            Ok(_) => return Err(AppError::communication("Expected a full queue")),
        }
        if tokio::time::timeout(SETTLE, kernel.execute_when_ready(async { Ok(4_u32) }))
            .await
            .is_ok()
        {
            return Err(AppError::communication(
                "Expected execute_when_ready to wait for queue space",
            ));
        }

        drop(gate_tx.send(()));
        let waited = promptly(kernel.execute_when_ready(async { Ok(5_u32) }), "queue space")
            .await??;
        let mut values = Vec::new();
        for handle in [blocking, queued, waited] {
            values.push(promptly(handle.join(), "queued job").await??);
        }
        if values != [1, 2, 5] {
            return Err(AppError::communication(format!(
                "Unexpected job results {:?}",
                values
            )));
        }
        Ok(())
    })
}
