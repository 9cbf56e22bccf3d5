//! Pool of shareable resources with exclusive reservations.
//!
//! One pool exists per [`crate::communication::ConnectionType`]; its members
//! are the live sockets accepted for that type. Callers reserve a single
//! resource with [`ResourcePool::reserve_next`] or every current member with
//! [`ResourcePool::reserve_all`]. A [`Reservation`] is released when it is
//! freed or dropped, so release happens on every exit path.
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{AppError, AppResult, CommunicationError, Component};


/// A pooled handle over one live connection.
pub trait Resource: Send + Sync + 'static {
    /// Closes the underlying connection. Called at most once by the pool but
    /// must tolerate repeated calls.
    fn close(&self);

    /// Whether the resource has been closed, by the pool or by itself.
    fn is_closed(&self) -> bool;
}

/// Pool-assigned identity of a resource. Keys increase in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(u64);

impl fmt::Display for ResourceKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

struct Slot<R> {
    key: ResourceKey,
    resource: Arc<R>,
    reserved: bool,
    /// Pending `reserve_all` call that gets this resource once it is free.
    claimed_by: Option<u64>,
    closing: bool,
}

impl<R: Resource> Slot<R> {
    fn is_dead(&self) -> bool {
        self.closing || self.resource.is_closed()
    }

    fn is_available(&self) -> bool {
        !self.reserved && self.claimed_by.is_none() && !self.is_dead()
    }
}

struct PoolState<R> {
    slots: Vec<Slot<R>>,
    next_key: u64,
    next_claim: u64,
    cursor: usize,
    shutdown: bool,
}

impl<R: Resource> PoolState<R> {
    /// Drops dead resources that nobody holds, returning them for closing
    /// outside the lock.
    fn prune(&mut self) -> Vec<Arc<R>> {
        let mut removed = Vec::new();
        self.slots.retain(|slot| {
            if slot.reserved || !slot.is_dead() {
                return true;
            }
            removed.push(Arc::clone(&slot.resource));
            false
        });
        removed
    }
}

struct PoolInner<R> {
    state: Mutex<PoolState<R>>,
    changed: Notify,
}

fn pool_shutdown() -> AppError {
    AppError::communication(CommunicationError::Shutdown {
        component: Component::ResourcePool,
    })
}

fn close_all<R: Resource>(resources: Vec<Arc<R>>) {
    for resource in resources {
        resource.close();
    }
}

impl<R: Resource> PoolInner<R> {
    fn try_reserve_next(self: &Arc<Self>) -> AppResult<Option<Reservation<R>>> {
        let mut guard = self.state.lock();
        if guard.shutdown {
            return Err(pool_shutdown());
        }
        let state = &mut *guard;
        let pruned = state.prune();

        let start = if state.cursor < state.slots.len() {
            state.cursor
        } else {
            0
        };
        let position = state
            .slots
            .iter()
            .enumerate()
            .skip(start)
            .chain(state.slots.iter().enumerate().take(start))
            .find(|(_, slot)| slot.is_available())
            .map(|(index, _)| index);

        let reservation = position.and_then(|index| {
            state.cursor = index.saturating_add(1);
            state.slots.get_mut(index).map(|slot| {
                slot.reserved = true;
                Reservation::new(Arc::clone(self), slot.key, Arc::clone(&slot.resource))
            })
        });
        drop(guard);
        close_all(pruned);
        Ok(reservation)
    }

    fn begin_claim(self: &Arc<Self>) -> AppResult<ClaimGuard<R>> {
        let mut guard = self.state.lock();
        if guard.shutdown {
            return Err(pool_shutdown());
        }
        let state = &mut *guard;
        let pruned = state.prune();
        let id = state.next_claim;
        state.next_claim = id.wrapping_add(1);
        let pending: Vec<ResourceKey> = state
            .slots
            .iter()
            .filter(|slot| !slot.is_dead())
            .map(|slot| slot.key)
            .collect();
        drop(guard);
        close_all(pruned);

        Ok(ClaimGuard {
            inner: Arc::clone(self),
            id,
            pending,
            reserved: Vec::new(),
        })
    }

    /// Reserves whatever the claim can take now. Returns `true` once every
    /// resource in the snapshot is held.
    fn advance_claim(self: &Arc<Self>, claim: &mut ClaimGuard<R>) -> AppResult<bool> {
        let mut guard = self.state.lock();
        if guard.shutdown {
            return Err(pool_shutdown());
        }
        let state = &mut *guard;
        let mut still_pending = Vec::with_capacity(claim.pending.len());

        for key in claim.pending.drain(..) {
            let Some(slot) = state.slots.iter_mut().find(|slot| slot.key == key) else {
                continue;
            };
            if slot.is_dead() {
                if slot.claimed_by == Some(claim.id) {
                    slot.claimed_by = None;
                }
                continue;
            }
            let claimable = slot.claimed_by.is_none_or(|owner| owner == claim.id);
            if !slot.reserved && claimable {
                slot.reserved = true;
                slot.claimed_by = None;
                claim.reserved.push(Reservation::new(
                    Arc::clone(self),
                    key,
                    Arc::clone(&slot.resource),
                ));
            } else {
                if slot.claimed_by.is_none() {
                    slot.claimed_by = Some(claim.id);
                }
                still_pending.push(key);
            }
        }

        claim.pending = still_pending;
        Ok(claim.pending.is_empty())
    }

    fn release(&self, key: ResourceKey) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let shutdown = state.shutdown;
        let mut removed = None;
        if let Some(index) = state.slots.iter().position(|slot| slot.key == key) {
            let remove = state.slots.get_mut(index).is_some_and(|slot| {
                slot.reserved = false;
                shutdown || slot.is_dead()
            });
            if remove {
                removed = Some(state.slots.remove(index).resource);
            }
        }
        drop(guard);

        if let Some(resource) = removed {
            debug!("Removed resource {} from pool", key);
            resource.close();
        }
        self.changed.notify_waiters();
    }

    fn mark_closing(&self, key: ResourceKey) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.iter_mut().find(|slot| slot.key == key) {
            slot.closing = true;
        }
    }
}

/// Shared, cloneable handle over one resource pool.
pub struct ResourcePool<R> {
    inner: Arc<PoolInner<R>>,
}

impl<R> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Resource> Default for ResourcePool<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> ResourcePool<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    slots: Vec::new(),
                    next_key: 0,
                    next_claim: 0,
                    cursor: 0,
                    shutdown: false,
                }),
                changed: Notify::new(),
            }),
        }
    }

    /// Adds a resource, making it immediately eligible for reservation.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Shutdown`] if the pool has been shut
    /// down; the resource is closed in that case.
    pub(crate) fn add(&self, resource: R) -> AppResult<ResourceKey> {
        let mut state = self.inner.state.lock();
        if state.shutdown {
            drop(state);
            resource.close();
            return Err(pool_shutdown());
        }
        let key = ResourceKey(state.next_key);
        state.next_key = state.next_key.wrapping_add(1);
        state.slots.push(Slot {
            key,
            resource: Arc::new(resource),
            reserved: false,
            claimed_by: None,
            closing: false,
        });
        drop(state);

        self.inner.changed.notify_waiters();
        Ok(key)
    }

    /// Waits until some resource is free and reserves it.
    ///
    /// Cancel-safe: dropping the future before it completes reserves
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Shutdown`] if the pool is, or becomes,
    /// shut down while waiting.
    pub async fn reserve_next(&self) -> AppResult<Reservation<R>> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(reservation) = self.inner.try_reserve_next()? {
                return Ok(reservation);
            }
            notified.await;
        }
    }

    /// Reserves every resource present when the call starts, waiting for
    /// the ones currently held elsewhere. Resources added during the call
    /// are not included; resources removed during the call are skipped.
    ///
    /// Reservations are returned in insertion order. Dropping the future
    /// early releases whatever it had already reserved.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Shutdown`] if the pool is, or becomes,
    /// shut down while waiting.
    pub async fn reserve_all(&self) -> AppResult<Vec<Reservation<R>>> {
        let mut claim = self.inner.begin_claim()?;
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.advance_claim(&mut claim)? {
                return Ok(claim.into_reservations());
            }
            notified.await;
        }
    }

    /// Number of live (not closing) resources, reserved or not.
    #[must_use]
    pub fn count_active(&self) -> usize {
        self.inner
            .state
            .lock()
            .slots
            .iter()
            .filter(|slot| !slot.is_dead())
            .count()
    }

    /// Closes every current resource. Free ones are dropped at once, held
    /// ones when their reservation is released.
    pub fn close_current_resources(&self) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let mut closing = Vec::with_capacity(state.slots.len());
        for slot in &mut state.slots {
            slot.closing = true;
            closing.push(Arc::clone(&slot.resource));
        }
        state.prune();
        drop(guard);

        close_all(closing);
        self.inner.changed.notify_waiters();
    }

    /// Shuts the pool down. Every current and future `reserve_*` call fails
    /// with [`CommunicationError::Shutdown`]. Idempotent.
    pub fn shutdown(&self) {
        let mut guard = self.inner.state.lock();
        if guard.shutdown {
            return;
        }
        guard.shutdown = true;
        let state = &mut *guard;
        for slot in &mut state.slots {
            slot.closing = true;
        }
        let pruned = state.prune();
        drop(guard);

        debug!("Resource pool shut down");
        close_all(pruned);
        self.inner.changed.notify_waiters();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }
}

/// Bookkeeping for one `reserve_all` call. Dropping it clears its claims
/// and releases any partial reservations.
struct ClaimGuard<R: Resource> {
    inner: Arc<PoolInner<R>>,
    id: u64,
    pending: Vec<ResourceKey>,
    reserved: Vec<Reservation<R>>,
}

impl<R: Resource> ClaimGuard<R> {
    fn into_reservations(mut self) -> Vec<Reservation<R>> {
        let mut reserved = std::mem::take(&mut self.reserved);
        reserved.sort_by_key(Reservation::key);
        reserved
    }
}

impl<R: Resource> Drop for ClaimGuard<R> {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock();
        for slot in state
            .slots
            .iter_mut()
            .filter(|slot| slot.claimed_by == Some(self.id))
        {
            slot.claimed_by = None;
        }
        drop(state);
        self.inner.changed.notify_waiters();
    }
}

/// Exclusive, temporary access to one pooled resource.
pub struct Reservation<R: Resource> {
    pool: Arc<PoolInner<R>>,
    key: ResourceKey,
    resource: Arc<R>,
}

impl<R: Resource> Reservation<R> {
    const fn new(pool: Arc<PoolInner<R>>, key: ResourceKey, resource: Arc<R>) -> Self {
        Self {
            pool,
            key,
            resource,
        }
    }

    #[must_use]
    pub fn resource(&self) -> &R {
        &self.resource
    }

    #[must_use]
    pub const fn key(&self) -> ResourceKey {
        self.key
    }

    /// Closes the resource. The pool drops it when this reservation is
    /// released.
    pub fn close(&self) {
        self.resource.close();
        self.pool.mark_closing(self.key);
    }

    /// Returns the resource to the pool.
    pub fn free(self) {
        drop(self);
    }
}

impl<R: Resource> Drop for Reservation<R> {
    fn drop(&mut self) {
        self.pool.release(self.key);
    }
}

impl<R: Resource> fmt::Debug for Reservation<R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Reservation")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
