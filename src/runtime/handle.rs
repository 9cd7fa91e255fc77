//! The handle controlled code uses to reach its scheduler.

use std::sync::Arc;

use super::operation::{OperationId, OperationTarget, OperationType};
use super::scheduler::OperationScheduler;
use crate::error::Result;

/// Cloneable handle passed to every controlled operation.
///
/// Task, yield and choice operations live in [`crate::sync::task`]; the
/// locks in [`crate::sync::lock`] take the handle by reference.
#[derive(Debug, Clone)]
pub struct ControlledRuntime {
    scheduler: Arc<OperationScheduler>,
}

impl ControlledRuntime {
    /// Wraps a scheduler.
    #[must_use]
    pub const fn new(scheduler: Arc<OperationScheduler>) -> Self {
        Self { scheduler }
    }

    /// Returns the underlying scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<OperationScheduler> {
        &self.scheduler
    }

    /// Returns the operation of the calling thread.
    ///
    /// # Errors
    ///
    /// Fails when called from an uncontrolled thread or after the iteration
    /// has stopped.
    pub fn current_operation(&self) -> Result<OperationId> {
        self.scheduler.current_operation()
    }

    /// Returns a controlled coin flip.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over.
    pub fn random_bool(&self) -> Result<bool> {
        self.scheduler.next_boolean_choice(2, None)
    }

    /// Returns `true` with probability `1 / max_value` under random strategies.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChoice` for a zero `max_value`.
    pub fn random_bool_with(&self, max_value: u32) -> Result<bool> {
        self.scheduler.next_boolean_choice(max_value, None)
    }

    /// Returns a controlled coin flip recorded under the choice site `id`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over.
    pub fn fair_random_bool(&self, id: &str) -> Result<bool> {
        self.scheduler.next_boolean_choice(2, Some(id))
    }

    /// Returns a controlled integer in `[0, max_value)`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChoice` for a zero `max_value`.
    pub fn random_int(&self, max_value: u32) -> Result<u32> {
        self.scheduler.next_integer_choice(max_value)
    }

    /// Reports a bug unless `condition` holds.
    ///
    /// # Errors
    ///
    /// Returns the `AssertionFailure` recorded for this iteration.
    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(self.scheduler.notify_assertion_failure(message))
        }
    }

    /// Sets the program-specific value hashed at the `Custom` and `Full`
    /// abstraction levels.
    pub fn set_custom_state(&self, value: u64) {
        self.scheduler.set_custom_state(value);
    }

    /// Marks a point where the code under test may inject a failure.
    ///
    /// Returns whether the failure should be injected.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over.
    pub fn failure_point(&self) -> Result<bool> {
        let current = self.current_operation()?;
        self.scheduler.schedule_next(
            OperationType::InjectFailure,
            OperationTarget::Task,
            current.as_u64(),
        )?;
        self.random_bool()
    }
}
