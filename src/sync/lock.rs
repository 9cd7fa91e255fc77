//! Controlled mutual exclusion.
//!
//! Acquiring and releasing a controlled lock are scheduling points, so the
//! order in which operations obtain a lock is decided by the strategy and
//! recorded in the trace.
//!
//! # Example
//!
//! ```ignore
//! use stepwise::sync::ControlledMutex;
//!
//! let counter = ControlledMutex::new(&rt, 0_u64);
//!
//! let mut guard = counter.lock(&rt)?;
//! *guard += 1;
//! // guard dropped, lock released, next waiter enabled
//! ```
//!
//! # Waiters
//!
//! Blocked operations queue in FIFO order with status `BlockedOnResource`.
//! A release hands the lock straight to the head of the queue and enables
//! it, so an operation arriving later can never overtake a queued one. A
//! lock without a holder therefore never has waiters.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::runtime::{ControlledRuntime, OperationId, OperationStatus, OperationTarget, OperationType};

#[derive(Debug, Default)]
struct LockState {
    holder: Option<OperationId>,
    waiters: VecDeque<OperationId>,
}

/// A lock whose acquisition order is chosen by the scheduler.
#[derive(Debug)]
pub struct ControlledLock {
    id: u64,
    state: Mutex<LockState>,
}

impl ControlledLock {
    /// Creates an unheld lock registered with `runtime`'s scheduler.
    #[must_use]
    pub fn new(runtime: &ControlledRuntime) -> Self {
        Self {
            id: runtime.scheduler().next_resource_id(),
            state: Mutex::new(LockState::default()),
        }
    }

    /// Returns the resource id used as the scheduling target.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns true while some operation holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state.lock().holder.is_some()
    }

    /// Returns the operation holding the lock.
    #[must_use]
    pub fn holder(&self) -> Option<OperationId> {
        self.state.lock().holder
    }

    /// Returns the number of queued waiters.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    #[cfg(test)]
    fn queued(&self) -> Vec<OperationId> {
        self.state.lock().waiters.iter().copied().collect()
    }

    /// Acquires the lock, blocking the calling operation while it is held.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` if the iteration stops while waiting.
    pub fn acquire(&self, runtime: &ControlledRuntime) -> Result<LockGuard<'_>> {
        let scheduler = runtime.scheduler();
        let current = scheduler.current_operation()?;

        loop {
            {
                let mut state = self.state.lock();
                match state.holder {
                    // Either free, or handed over by the last release.
                    None => {
                        state.holder = Some(current);
                        break;
                    }
                    Some(holder) if holder == current => break,
                    Some(_) => {}
                }
                if !state.waiters.contains(&current) {
                    state.waiters.push_back(current);
                }
            }
            tracing::trace!(op = %current, lock = self.id, "queued on lock");
            scheduler.set_operation_status(current, OperationStatus::BlockedOnResource)?;
            scheduler.schedule_next(OperationType::Acquire, OperationTarget::Lock, self.id)?;
        }

        let guard = LockGuard {
            lock: self,
            runtime: runtime.clone(),
        };
        scheduler.schedule_next(OperationType::Acquire, OperationTarget::Lock, self.id)?;
        Ok(guard)
    }

    fn release(&self, runtime: &ControlledRuntime) {
        let next = {
            let mut state = self.state.lock();
            state.holder = state.waiters.pop_front();
            state.holder
        };
        if let Some(waiter) = next {
            tracing::trace!(op = %waiter, lock = self.id, "lock handed to waiter");
            if let Err(err) = runtime
                .scheduler()
                .set_operation_status(waiter, OperationStatus::Enabled)
            {
                tracing::debug!(%err, lock = self.id, "failed to enable waiter");
            }
        }

        // The unwinding operation is reported by its wrapper; skip the scheduling point.
        if std::thread::panicking() {
            return;
        }
        if let Err(err) = runtime.scheduler().schedule_next(
            OperationType::Release,
            OperationTarget::Lock,
            self.id,
        ) {
            if !err.is_canceled() {
                tracing::debug!(%err, lock = self.id, "release scheduling point failed");
            }
        }
    }
}

/// Releases a [`ControlledLock`] when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a ControlledLock,
    runtime: ControlledRuntime,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(&self.runtime);
    }
}

/// A controlled lock protecting a value.
#[derive(Debug)]
pub struct ControlledMutex<T> {
    lock: ControlledLock,
    data: Mutex<T>,
}

impl<T> ControlledMutex<T> {
    /// Creates a mutex registered with `runtime`'s scheduler.
    #[must_use]
    pub fn new(runtime: &ControlledRuntime, value: T) -> Self {
        Self {
            lock: ControlledLock::new(runtime),
            data: Mutex::new(value),
        }
    }

    /// Locks the mutex, blocking the calling operation while it is held.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` if the iteration stops while waiting.
    pub fn lock(&self, runtime: &ControlledRuntime) -> Result<ControlledMutexGuard<'_, T>> {
        let guard = self.lock.acquire(runtime)?;
        let data = self
            .data
            .try_lock()
            .ok_or_else(|| Error::internal("controlled mutex data borrowed without the lock"))?;
        Ok(ControlledMutexGuard { data, _guard: guard })
    }

    /// Returns true while some operation holds the mutex.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    /// Returns a mutable reference to the value.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the mutex, returning the value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Access to the value of a locked [`ControlledMutex`].
///
/// The value is released before the lock.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct ControlledMutexGuard<'a, T> {
    data: MutexGuard<'a, T>,
    _guard: LockGuard<'a>,
}

impl<T> Deref for ControlledMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for ControlledMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyKind;
    use crate::sync::TaskHandle;
    use crate::test_utils::{init_test_logging, test_config, test_engine_with_config};
    use crate::TestingEngine;
    use std::sync::Arc;

    type Order = Arc<Mutex<Vec<OperationId>>>;

    fn contender(
        rt: &ControlledRuntime,
        name: &str,
        lock: &Arc<ControlledLock>,
        order: &Order,
    ) -> Result<TaskHandle<()>> {
        let lock = Arc::clone(lock);
        let order = Arc::clone(order);
        rt.spawn(name, move |rt| {
            let _guard = lock.acquire(&rt)?;
            order.lock().push(rt.current_operation()?);
            rt.yield_now()
        })
    }

    #[test]
    fn queued_waiters_acquire_in_arrival_order() {
        init_test_logging();
        let config = test_config(StrategyKind::Random, 300).stop_on_first_bug(true);
        let mut engine = test_engine_with_config(config);
        let report = engine.run(|rt| {
            let lock = Arc::new(ControlledLock::new(rt));
            let order: Order = Arc::default();

            let guard = lock.acquire(rt)?;
            let w1 = contender(rt, "w1", &lock, &order)?;
            let w2 = contender(rt, "w2", &lock, &order)?;
            for _ in 0..3 {
                rt.yield_now()?;
            }
            let late = contender(rt, "late", &lock, &order)?;
            let queued = lock.queued();
            drop(guard);

            rt.wait_all(&[w1.id(), w2.id(), late.id()])?;
            let order = order.lock().clone();
            rt.assert(
                order.starts_with(&queued),
                format!("queued {queued:?} but acquired {order:?}"),
            )
        });

        assert!(!report.has_bugs(), "{:?}", report.report.bug_reports);
        assert_eq!(report.runs.len(), 300);
    }

    #[test]
    fn held_lock_queues_without_duplicates() {
        init_test_logging();
        let mut engine = TestingEngine::new(test_config(StrategyKind::Random, 20)).unwrap();
        let report = engine.run(|rt| {
            let lock = Arc::new(ControlledLock::new(rt));
            let order: Order = Arc::default();
            let guard = lock.acquire(rt)?;
            let w = contender(rt, "w", &lock, &order)?;
            for _ in 0..5 {
                rt.yield_now()?;
            }
            rt.assert(lock.waiters() <= 1, "waiter queued twice")?;
            drop(guard);
            rt.join(w)?;
            rt.assert(!lock.is_held() && lock.waiters() == 0, "lock left held")
        });
        assert!(!report.has_bugs(), "{:?}", report.report.bug_reports);
    }
}
