//! Controlled tasks: spawning, yielding and joining.
//!
//! Each task runs on its own OS thread, parked by the scheduler whenever it
//! is not the scheduled operation. Every call here is a scheduling point.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::{
    ControlledRuntime, OperationId, OperationStatus, OperationTarget, OperationType, WaitMode,
};

/// Handle to a spawned task's result.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: OperationId,
    name: String,
    result: Arc<Mutex<Option<T>>>,
}

impl<T> TaskHandle<T> {
    /// Returns the task's operation id.
    #[must_use]
    pub const fn id(&self) -> OperationId {
        self.id
    }

    /// Returns the task's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true once the task has stored its result.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.result.lock().is_some()
    }
}

impl ControlledRuntime {
    /// Spawns a controlled task.
    ///
    /// # Errors
    ///
    /// Fails when called from an uncontrolled thread, or with
    /// `ExecutionCanceled` once the iteration is over.
    pub fn spawn<T, F>(&self, name: impl Into<String>, f: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T> + Send + 'static,
    {
        self.current_operation()?;
        let handle = self.start_operation(name, f)?;
        self.scheduler()
            .schedule_next(OperationType::Create, OperationTarget::Task, handle.id.as_u64())?;
        Ok(handle)
    }

    /// Registers an operation and starts its thread without a scheduling
    /// point. The engine uses this for the root operation.
    pub(crate) fn start_operation<T, F>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T> + Send + 'static,
    {
        let name = name.into();
        let scheduler = self.scheduler();
        let id = scheduler.notify_operation_created(name.clone())?;
        let result = Arc::new(Mutex::new(None));

        let runtime = self.clone();
        let slot = Arc::clone(&result);
        let op_name = name.clone();
        let thread = thread::Builder::new()
            .name(format!("stepwise-op-{}", id.as_u64()))
            .spawn(move || run_operation(&runtime, id, &op_name, f, &slot))
            .map_err(|err| {
                scheduler.notify_failure(
                    ErrorKind::Internal,
                    format!("failed to start thread for operation '{name}': {err}"),
                )
            })?;
        scheduler.register_thread(thread);
        scheduler.wait_for_operation_to_start(id)?;

        Ok(TaskHandle { id, name, result })
    }

    /// Gives the scheduler a chance to run another operation.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over.
    pub fn yield_now(&self) -> Result<()> {
        let current = self.current_operation()?;
        self.scheduler()
            .schedule_next(OperationType::Yield, OperationTarget::Task, current.as_u64())
    }

    /// A virtual delay: a scheduling point, without sleeping.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over.
    pub fn delay(&self, duration: Duration) -> Result<()> {
        tracing::trace!(?duration, "virtual delay");
        self.yield_now()
    }

    /// Forces a scheduling point.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over.
    pub fn inject_context_switch(&self) -> Result<()> {
        self.yield_now()
    }

    /// Blocks until every operation in `ids` has completed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperation` for unregistered ids and
    /// `ExecutionCanceled` once the iteration is over.
    pub fn wait_all(&self, ids: &[OperationId]) -> Result<()> {
        let current = self.current_operation()?;
        let scheduler = self.scheduler();
        scheduler.block_on_operations(current, ids, WaitMode::All)?;
        scheduler.schedule_next(OperationType::Join, OperationTarget::Task, current.as_u64())
    }

    /// Blocks until one operation in `ids` has completed and returns it.
    ///
    /// # Errors
    ///
    /// Returns a `User` error for an empty `ids`, `UnknownOperation` for
    /// unregistered ids and `ExecutionCanceled` once the iteration is over.
    pub fn wait_any(&self, ids: &[OperationId]) -> Result<OperationId> {
        if ids.is_empty() {
            return Err(Error::user("wait_any needs at least one operation"));
        }
        let current = self.current_operation()?;
        let scheduler = self.scheduler();
        scheduler.block_on_operations(current, ids, WaitMode::Any)?;
        scheduler.schedule_next(OperationType::Join, OperationTarget::Task, current.as_u64())?;

        let ops = scheduler.operations();
        ids.iter()
            .copied()
            .find(|id| {
                ops.iter()
                    .any(|op| op.id() == *id && op.status() == OperationStatus::Completed)
            })
            .ok_or_else(Error::canceled)
    }

    /// Waits for `handle`'s task and returns its result.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` if the iteration stops first, which is
    /// also the case when the task failed.
    pub fn join<T>(&self, handle: TaskHandle<T>) -> Result<T> {
        self.wait_all(&[handle.id])?;
        let value = handle.result.lock().take();
        value.ok_or_else(|| {
            Error::internal(format!(
                "operation '{}' completed without a result",
                handle.name
            ))
        })
    }
}

fn run_operation<T, F>(
    runtime: &ControlledRuntime,
    id: OperationId,
    name: &str,
    f: F,
    slot: &Mutex<Option<T>>,
) where
    F: FnOnce(ControlledRuntime) -> Result<T>,
{
    let scheduler = runtime.scheduler();
    if scheduler.notify_operation_started(id).is_err() {
        return;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(runtime.clone())));
    match outcome {
        Ok(Ok(value)) => {
            *slot.lock() = Some(value);
            // Cancellation here only means this was the last operation.
            let _ = scheduler.notify_operation_completed(id);
        }
        Ok(Err(err)) => {
            if err.is_canceled() || !scheduler.is_running() {
                return;
            }
            scheduler.notify_assertion_failure(format!(
                "Unhandled failure in operation '{name}': {err}"
            ));
        }
        Err(payload) => {
            if !scheduler.is_running() {
                return;
            }
            scheduler.notify_assertion_failure(format!(
                "Operation '{name}' panicked: {}",
                panic_message(payload.as_ref())
            ));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
