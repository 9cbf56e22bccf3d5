use std::future::Future;

use tokio::sync::broadcast;

use crate::error::{AppError, AppResult, CommunicationError};

pub type ShutdownSender = broadcast::Sender<()>;
pub type ShutdownReceiver = broadcast::Receiver<()>;

/// Runs `future` until it completes or `interrupt` fires.
///
/// A fired (or closed) interrupt channel wins over the pending future, which
/// is dropped. Every blocking operation in [`crate::communication`] is safe to
/// cancel this way.
///
/// # Errors
///
/// Returns the future's own error, or [`CommunicationError::Interrupted`] when
/// the interrupt channel fires first.
pub async fn interruptible<F, T>(future: F, interrupt: &mut ShutdownReceiver) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::select! {
        result = future => result,
        _ = interrupt.recv() => Err(AppError::communication(CommunicationError::Interrupted)),
    }
}
