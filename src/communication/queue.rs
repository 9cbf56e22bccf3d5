use std::collections::VecDeque;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::error;

use crate::error::{AppError, AppResult, CommunicationError, Component, QueuedFailure};

/// An item in a [`MessageQueue`]: either a message or a failure that is
/// raised to whoever dequeues it.
pub enum QueueEntry<M> {
    Message(M),
    Failure(QueuedFailure),
}

struct QueueState<M> {
    entries: VecDeque<QueueEntry<M>>,
    /// No more entries will be queued; the rest can still be dequeued.
    closed: bool,
    shutdown: bool,
}

fn queue_shutdown() -> AppError {
    AppError::communication(CommunicationError::Shutdown {
        component: Component::MessageQueue,
    })
}

fn unpack<M>(entry: QueueEntry<M>) -> AppResult<M> {
    match entry {
        QueueEntry::Message(message) => Ok(message),
        QueueEntry::Failure(source) => Err(AppError::communication(CommunicationError::Queued {
            message: source.to_string(),
            source,
        })),
    }
}

/// Thread-safe FIFO of messages, optionally interleaved with failures.
///
/// Shutting the queue down discards everything still queued and fails every
/// later operation.
pub struct MessageQueue<M> {
    state: Mutex<QueueState<M>>,
    changed: Notify,
    pass_failures: bool,
}

impl<M> MessageQueue<M> {
    /// `pass_failures` decides whether [`Self::queue_failure`] is allowed.
    #[must_use]
    pub fn new(pass_failures: bool) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                closed: false,
                shutdown: false,
            }),
            changed: Notify::new(),
            pass_failures,
        }
    }

    /// # Errors
    ///
    /// Returns a shutdown error once the queue has been closed or shut down.
    pub fn queue(&self, message: M) -> AppResult<()> {
        self.lock().queue(message)
    }

    /// Queues a failure to be raised by the matching [`Self::dequeue`].
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::FailuresNotQueueable`] if this queue was
    /// built without failure passing, which is a programming error, or a
    /// shutdown error once the queue has been closed or shut down.
    pub fn queue_failure<E>(&self, failure: E) -> AppResult<()>
    where
        E: Into<QueuedFailure>,
    {
        if !self.pass_failures {
            let failure = failure.into();
            error!("Refusing to queue failure on a message-only queue: {}", failure);
            return Err(AppError::communication(
                CommunicationError::FailuresNotQueueable,
            ));
        }
        self.lock().push(QueueEntry::Failure(failure.into()))
    }

    /// Takes the oldest entry. With `block` set this waits for one to
    /// arrive; otherwise an empty queue yields `Ok(None)`. A closed queue
    /// yields `Ok(None)` once drained, without blocking.
    ///
    /// Cancel-safe: nothing is removed unless the call completes.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Queued`] wrapping a dequeued failure,
    /// or a shutdown error if the queue is (or becomes) shut down.
    pub async fn dequeue(&self, block: bool) -> AppResult<Option<M>> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (next, closed) = {
                let mut guard = self.lock();
                (guard.try_dequeue()?, guard.is_closed())
            };
            if next.is_some() || closed || !block {
                return Ok(next);
            }
            notified.await;
        }
    }

    /// Stops accepting entries while keeping those already queued, and
    /// wakes blocked callers. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed || state.shutdown {
            return;
        }
        state.closed = true;
        drop(state);
        self.changed.notify_waiters();
    }

    /// Discards queued entries and wakes blocked callers. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        state.entries.clear();
        drop(state);
        self.changed.notify_waiters();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Holds the queue lock so several operations happen atomically.
    /// Blocked dequeuers are woken when the guard drops.
    pub fn lock(&self) -> MessageQueueGuard<'_, M> {
        MessageQueueGuard {
            queue: self,
            state: self.state.lock(),
            changed: false,
        }
    }
}

/// Exclusive access to a [`MessageQueue`]; see [`MessageQueue::lock`].
pub struct MessageQueueGuard<'guard, M> {
    queue: &'guard MessageQueue<M>,
    state: MutexGuard<'guard, QueueState<M>>,
    changed: bool,
}

impl<M> MessageQueueGuard<'_, M> {
    /// # Errors
    ///
    /// Returns a shutdown error once the queue has been closed or shut down.
    pub fn queue(&mut self, message: M) -> AppResult<()> {
        self.push(QueueEntry::Message(message))
    }

    fn push(&mut self, entry: QueueEntry<M>) -> AppResult<()> {
        if self.state.shutdown || self.state.closed {
            return Err(queue_shutdown());
        }
        self.state.entries.push_back(entry);
        self.changed = true;
        Ok(())
    }

    /// # Errors
    ///
    /// As for [`MessageQueue::dequeue`].
    pub fn try_dequeue(&mut self) -> AppResult<Option<M>> {
        if self.state.shutdown {
            return Err(queue_shutdown());
        }
        self.state.entries.pop_front().map(unpack).transpose()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.shutdown
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed
    }
}

impl<M> Drop for MessageQueueGuard<'_, M> {
    fn drop(&mut self) {
        if self.changed {
            self.queue.changed.notify_waiters();
        }
    }
}
