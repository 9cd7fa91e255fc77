//! The operation scheduler.
//!
//! Every controlled operation runs on its own OS thread, but only one of
//! them executes at any time: the one holding the execution token
//! (`is_active`). All other operation threads are parked on their own
//! condition variable. At each scheduling point the active operation asks
//! the strategy for the next operation, hands the token over, and parks
//! until the token comes back.
//!
//! # Invariants
//!
//! - While the scheduler is running, exactly one registered operation is
//!   active and it is the scheduled one.
//! - Only a thread bound to the scheduled operation may take a scheduling
//!   decision; any other caller is reported as uncontrolled concurrency.
//! - Only the first failure of an iteration is recorded.
//! - Once stopped, every operation is `Completed` and active, so every
//!   parked thread wakes up and observes the cancellation.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use super::operation::{
    AsyncOperation, OperationId, OperationStatus, OperationTarget, OperationType, WaitMode,
};
use super::report::{BugReport, IterationStats, TestReport};
use super::state::StateHasher;
use crate::error::{Error, ErrorKind, Result};
use crate::strategy::{SchedulingStrategy, Strategy};
use crate::trace::{ScheduleTrace, TraceMetadata};

/// Per-iteration settings of an [`OperationScheduler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Report hitting the step bound as a bug.
    pub consider_depth_bound_hit_as_bug: bool,
    /// Unfair step bound, used to classify long fair schedules.
    pub max_unfair_steps: u64,
    /// Campaign seed, recorded in the trace.
    pub seed: u64,
    /// Iteration index, recorded in the trace.
    pub iteration: u64,
}

struct SchedulerState {
    operations: BTreeMap<OperationId, AsyncOperation>,
    parkers: HashMap<OperationId, Arc<Condvar>>,
    scheduled: Option<OperationId>,
    running: bool,
    fully_explored: bool,
    hit_bound: bool,
    bug: Option<BugReport>,
    trace: ScheduleTrace,
    custom_state: Option<u64>,
}

impl SchedulerState {
    fn operation(&self, id: OperationId) -> Result<&AsyncOperation> {
        self.operations
            .get(&id)
            .ok_or_else(|| unknown_operation(id))
    }

    fn operation_mut(&mut self, id: OperationId) -> Result<&mut AsyncOperation> {
        self.operations
            .get_mut(&id)
            .ok_or_else(|| unknown_operation(id))
    }

    fn parker(&self, id: OperationId) -> Result<Arc<Condvar>> {
        self.parkers
            .get(&id)
            .cloned()
            .ok_or_else(|| unknown_operation(id))
    }

    fn has_enabled(&self) -> bool {
        self.operations.values().any(AsyncOperation::is_enabled)
    }
}

fn unknown_operation(id: OperationId) -> Error {
    Error::new(ErrorKind::UnknownOperation).with_operation(id)
}

/// Serializes the execution of controlled operations.
pub struct OperationScheduler {
    options: SchedulerOptions,
    state: Mutex<SchedulerState>,
    stopped: Condvar,
    strategy: Arc<Mutex<Strategy>>,
    hasher: Arc<dyn StateHasher>,
    controlled_threads: RwLock<HashMap<ThreadId, OperationId>>,
    next_operation_id: AtomicU64,
    next_resource_id: AtomicU64,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for OperationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationScheduler")
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl OperationScheduler {
    /// Creates a scheduler for one iteration.
    ///
    /// The strategy is shared with the caller so it can be prepared for the
    /// next iteration once this one has stopped.
    #[must_use]
    pub fn new(
        options: SchedulerOptions,
        strategy: Arc<Mutex<Strategy>>,
        hasher: Arc<dyn StateHasher>,
    ) -> Self {
        let metadata = {
            let strategy = strategy.lock();
            TraceMetadata::new(options.seed)
                .with_strategy(strategy.description())
                .with_iteration(options.iteration)
                .with_step_bound(strategy.max_steps(), options.consider_depth_bound_hit_as_bug)
        };
        Self {
            options,
            state: Mutex::new(SchedulerState {
                operations: BTreeMap::new(),
                parkers: HashMap::new(),
                scheduled: None,
                running: true,
                fully_explored: false,
                hit_bound: false,
                bug: None,
                trace: ScheduleTrace::new(metadata),
                custom_state: None,
            }),
            stopped: Condvar::new(),
            strategy,
            hasher,
            controlled_threads: RwLock::new(HashMap::new()),
            next_operation_id: AtomicU64::new(0),
            next_resource_id: AtomicU64::new(0),
            threads: Mutex::new(Vec::new()),
        }
    }

    // =========================================================================
    // Scheduling points
    // =========================================================================

    /// Takes a scheduling decision on behalf of the calling operation.
    ///
    /// `kind`, `target` and `target_id` describe the scheduling point the
    /// caller is paused at. Returns once the caller is scheduled again.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over, and a bug
    /// error if the caller is not the scheduled controlled operation.
    pub fn schedule_next(
        &self,
        kind: OperationType,
        target: OperationTarget,
        target_id: u64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let current = self.check_caller(&mut state)?;
        self.check_step_bound(&mut state)?;

        state.operation_mut(current)?.set_pending(kind, target, target_id);
        self.capture_state(&mut state, current);
        try_enable_blocked(&mut state);

        let next = {
            let ops: Vec<&AsyncOperation> = state.operations.values().collect();
            let current_op = state.operation(current)?;
            self.strategy.lock().get_next(current_op, &ops)
        };

        let Some(next) = next else {
            if !state.has_enabled() {
                if let Some(message) = livelock_message(&state) {
                    return Err(self.fail(&mut state, ErrorKind::Livelock, message));
                }
            }
            return Err(self.choices_exhausted(&mut state, current));
        };

        tracing::trace!(from = %current, to = %next, ?kind, ?target, "scheduling decision");
        state.trace.add_scheduling_choice(next);
        self.switch_to(&mut state, current, next)
    }

    /// Resolves a boolean choice for the calling operation.
    ///
    /// `true` is returned with probability `1 / max_value` under the random
    /// strategies. A `fairness_id` marks the choice site in the trace.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChoice` for a zero `max_value`, `ExecutionCanceled`
    /// once the iteration is over.
    pub fn next_boolean_choice(&self, max_value: u32, fairness_id: Option<&str>) -> Result<bool> {
        if max_value == 0 {
            return Err(Error::new(ErrorKind::InvalidChoice)
                .with_message("boolean choice needs a max value of at least 1"));
        }
        let mut state = self.state.lock();
        let current = self.check_caller(&mut state)?;
        self.check_step_bound(&mut state)?;
        self.capture_state(&mut state, current);

        let choice = {
            let current_op = state.operation(current)?;
            self.strategy
                .lock()
                .get_next_boolean_choice(current_op, max_value)
        };
        let Some(value) = choice else {
            return Err(self.choices_exhausted(&mut state, current));
        };

        tracing::trace!(op = %current, value, fairness_id, "boolean choice");
        match fairness_id {
            Some(id) => state.trace.add_fair_boolean_choice(id, value),
            None => state.trace.add_boolean_choice(value),
        }
        Ok(value)
    }

    /// Resolves an integer choice in `[0, max_value)` for the calling operation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChoice` for a zero `max_value`, `ExecutionCanceled`
    /// once the iteration is over.
    pub fn next_integer_choice(&self, max_value: u32) -> Result<u32> {
        if max_value == 0 {
            return Err(Error::new(ErrorKind::InvalidChoice)
                .with_message("integer choice needs a non-empty range"));
        }
        let mut state = self.state.lock();
        let current = self.check_caller(&mut state)?;
        self.check_step_bound(&mut state)?;
        self.capture_state(&mut state, current);

        let choice = {
            let current_op = state.operation(current)?;
            self.strategy
                .lock()
                .get_next_integer_choice(current_op, max_value)
        };
        let Some(value) = choice else {
            return Err(self.choices_exhausted(&mut state, current));
        };

        tracing::trace!(op = %current, value, max_value, "integer choice");
        state.trace.add_integer_choice(value);
        Ok(value)
    }

    // =========================================================================
    // Operation lifecycle
    // =========================================================================

    /// Registers a new operation and returns its id.
    ///
    /// The first operation registered with a scheduler becomes the scheduled
    /// one.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over.
    pub fn notify_operation_created(&self, name: impl Into<String>) -> Result<OperationId> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(Error::canceled());
        }
        let id = OperationId::new(self.next_operation_id.fetch_add(1, Ordering::Relaxed));
        let op = AsyncOperation::new(id, name);
        tracing::debug!(op = %id, name = op.name(), "operation created");
        state.operations.insert(id, op);
        state.parkers.insert(id, Arc::new(Condvar::new()));
        if state.scheduled.is_none() {
            state.scheduled = Some(id);
        }
        Ok(id)
    }

    /// Binds the calling thread to `id` and parks it until `id` is scheduled.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` if the iteration ends first.
    pub fn notify_operation_started(&self, id: OperationId) -> Result<()> {
        self.controlled_threads
            .write()
            .insert(thread::current().id(), id);

        let mut state = self.state.lock();
        let parker = state.parker(id)?;
        state.operation_mut(id)?.set_handler_running(true);
        parker.notify_all();

        loop {
            if !state.running {
                return Err(Error::canceled());
            }
            if state.operation(id)?.is_active() {
                break;
            }
            parker.wait(&mut state);
        }
        tracing::trace!(op = %id, "operation started");
        Ok(())
    }

    /// Waits until the thread of `id` has started running.
    ///
    /// The very first operation of an iteration is activated here instead,
    /// since no scheduled operation exists yet to hand control over to it.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` if the iteration ends first.
    pub fn wait_for_operation_to_start(&self, id: OperationId) -> Result<()> {
        let mut state = self.state.lock();
        let parker = state.parker(id)?;

        if state.operations.len() == 1 {
            state.operation_mut(id)?.set_active(true);
            state.scheduled = Some(id);
            parker.notify_all();
            return Ok(());
        }

        loop {
            if !state.running {
                return Err(Error::canceled());
            }
            if state.operation(id)?.is_handler_running() {
                return Ok(());
            }
            parker.wait(&mut state);
        }
    }

    /// Marks the calling operation `Completed` and schedules the next one.
    ///
    /// Completion of the last enabled operation ends the iteration.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` when the iteration ended, either before
    /// or because of this completion.
    pub fn notify_operation_completed(&self, id: OperationId) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.running {
                return Err(Error::canceled());
            }
            let op = state.operation_mut(id)?;
            op.set_status(OperationStatus::Completed);
            op.set_handler_running(false);
            tracing::debug!(op = %id, "operation completed");
        }
        self.schedule_next(OperationType::Stop, OperationTarget::Task, id.as_u64())
    }

    /// Sets the status of `id`.
    ///
    /// Host integrations use this to block an operation on an inbox or a
    /// resource before calling [`schedule_next`](Self::schedule_next).
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperation` if `id` is not registered.
    pub fn set_operation_status(&self, id: OperationId, status: OperationStatus) -> Result<()> {
        let mut state = self.state.lock();
        let op = state.operation_mut(id)?;
        if op.status() != OperationStatus::Completed {
            op.set_status(status);
        }
        Ok(())
    }

    /// Blocks `id` until all (or any) of `dependencies` complete.
    ///
    /// Leaves the operation enabled when the condition already holds.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperation` if any id is not registered.
    pub fn block_on_operations(
        &self,
        id: OperationId,
        dependencies: &[OperationId],
        mode: WaitMode,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let mut completed = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            completed.push(state.operation(*dep)?.status() == OperationStatus::Completed);
        }
        let satisfied = match mode {
            WaitMode::All => completed.iter().all(|c| *c),
            WaitMode::Any => completed.iter().any(|c| *c),
        };
        if !satisfied {
            state.operation_mut(id)?.block_on(dependencies.to_vec(), mode);
        }
        Ok(())
    }

    /// Records a failure of the code under test and stops the iteration.
    ///
    /// Only the first failure of an iteration is kept. The returned error is
    /// meant to be propagated by the caller.
    pub fn notify_assertion_failure(&self, message: impl Into<String>) -> Error {
        self.notify_failure(ErrorKind::AssertionFailure, message)
    }

    /// Records a failure of the given kind and stops the iteration.
    pub fn notify_failure(&self, kind: ErrorKind, message: impl Into<String>) -> Error {
        let mut state = self.state.lock();
        self.fail(&mut state, kind, message.into())
    }

    /// Stops the iteration, releasing every parked operation.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        self.halt(&mut state);
    }

    /// Blocks until the iteration has stopped.
    pub fn wait_until_stopped(&self) {
        let mut state = self.state.lock();
        while state.running {
            self.stopped.wait(&mut state);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns the operation bound to the calling thread, checking that it
    /// is the scheduled one.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over, and a bug
    /// error for uncontrolled callers.
    pub fn current_operation(&self) -> Result<OperationId> {
        let mut state = self.state.lock();
        self.check_caller(&mut state)
    }

    /// Sets the value hashed at the `Custom` and `Full` abstraction levels.
    pub fn set_custom_state(&self, value: u64) {
        self.state.lock().custom_state = Some(value);
    }

    /// Returns true until the iteration stops.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Returns true if the strategy ran out of decisions without a bug and
    /// without leaving its planned schedule.
    #[must_use]
    pub fn has_fully_explored(&self) -> bool {
        self.state.lock().fully_explored
    }

    /// Returns true if the step bound ended the iteration.
    #[must_use]
    pub fn hit_step_bound(&self) -> bool {
        self.state.lock().hit_bound
    }

    /// Returns the recorded failure, if any.
    #[must_use]
    pub fn bug(&self) -> Option<BugReport> {
        self.state.lock().bug.clone()
    }

    /// Returns a snapshot of every registered operation, ordered by id.
    #[must_use]
    pub fn operations(&self) -> Vec<AsyncOperation> {
        self.state.lock().operations.values().cloned().collect()
    }

    /// Summarizes the iteration.
    #[must_use]
    pub fn get_report(&self) -> TestReport {
        let state = self.state.lock();
        let strategy = self.strategy.lock();
        TestReport::for_iteration(IterationStats {
            fair: strategy.is_fair(),
            steps: strategy.scheduled_steps(),
            hit_bound: state.hit_bound || strategy.has_reached_max_steps(),
            max_unfair_steps: self.options.max_unfair_steps,
            bug: state.bug.as_ref(),
        })
    }

    /// Takes the trace recorded so far.
    #[must_use]
    pub fn take_trace(&self) -> ScheduleTrace {
        std::mem::take(&mut self.state.lock().trace)
    }

    /// Allocates an id for a controlled resource such as a lock.
    #[must_use]
    pub fn next_resource_id(&self) -> u64 {
        self.next_resource_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_thread(&self, handle: JoinHandle<()>) {
        self.threads.lock().push(handle);
    }

    /// Joins every operation thread. Call after [`wait_until_stopped`](Self::wait_until_stopped).
    pub fn join_threads(&self) {
        loop {
            let handles = std::mem::take(&mut *self.threads.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let name = handle.thread().name().map(str::to_owned);
                if handle.join().is_err() {
                    tracing::warn!(thread = ?name, "operation thread panicked outside its body");
                }
            }
        }
    }

    // =========================================================================
    // Internals (state lock held)
    // =========================================================================

    fn check_caller(&self, state: &mut SchedulerState) -> Result<OperationId> {
        if !state.running {
            return Err(Error::canceled());
        }
        let thread = thread::current();
        let bound = self.controlled_threads.read().get(&thread.id()).copied();
        match bound {
            Some(id) if state.scheduled == Some(id) => Ok(id),
            Some(id) => {
                let name = state
                    .operation(id)
                    .map(|op| op.name().to_owned())
                    .unwrap_or_default();
                let message = format!(
                    "Operation '{name}' invoked a scheduling method while it was not scheduled."
                );
                Err(self.fail(state, ErrorKind::UncontrolledConcurrency, message))
            }
            None => {
                let message = format!(
                    "Uncontrolled thread '{}' invoked a scheduling method. Only operations \
                     spawned through the controlled runtime may do so.",
                    thread.name().unwrap_or("<unnamed>")
                );
                Err(self.fail(state, ErrorKind::UncontrolledConcurrency, message))
            }
        }
    }

    fn check_step_bound(&self, state: &mut SchedulerState) -> Result<()> {
        let (reached, bound) = {
            let strategy = self.strategy.lock();
            (strategy.has_reached_max_steps(), strategy.max_steps())
        };
        if !reached {
            return Ok(());
        }

        state.hit_bound = true;
        state.trace.metadata.ended_on_bound = true;
        let message = format!("Scheduling steps bound of {bound} reached.");
        if self.options.consider_depth_bound_hit_as_bug {
            return Err(self.fail(state, ErrorKind::StepBoundReached, message));
        }
        tracing::warn!(bound, "{message}");
        self.halt(state);
        Err(Error::canceled())
    }

    fn capture_state(&self, state: &mut SchedulerState, current: OperationId) {
        let hashed = {
            let ops: Vec<&AsyncOperation> = state.operations.values().collect();
            self.hasher.capture(&ops, state.custom_state)
        };
        if let Some(op) = state.operations.get_mut(&current) {
            op.set_hashed_state(hashed);
        }
    }

    /// The strategy offered no decision. That ends the schedule, which only
    /// counts as explored if the strategy was still following its plan.
    fn choices_exhausted(&self, state: &mut SchedulerState, current: OperationId) -> Error {
        let divergence = self.strategy.lock().divergence().map(str::to_owned);
        match divergence {
            Some(reason) => {
                tracing::warn!(op = %current, %reason, "strategy left its schedule");
                state.fully_explored = false;
            }
            None => {
                tracing::debug!(op = %current, "schedule explored");
                state.fully_explored = state.bug.is_none();
            }
        }
        self.halt(state);
        Error::canceled()
    }

    /// Hands the execution token from `current` to `next` and parks the
    /// caller until the token returns.
    fn switch_to(
        &self,
        state: &mut MutexGuard<'_, SchedulerState>,
        current: OperationId,
        next: OperationId,
    ) -> Result<()> {
        state.scheduled = Some(next);
        if next == current {
            return Ok(());
        }

        state.operation_mut(current)?.set_active(false);
        state.operation_mut(next)?.set_active(true);
        state.parker(next)?.notify_all();

        if !state.operation(current)?.is_handler_running() {
            // The caller completed; its thread just exits.
            return Ok(());
        }

        let parker = state.parker(current)?;
        while !state.operation(current)?.is_active() {
            parker.wait(state);
        }
        if !state.running || !state.operation(current)?.is_enabled() {
            return Err(Error::canceled());
        }
        Ok(())
    }

    fn fail(&self, state: &mut SchedulerState, kind: ErrorKind, message: String) -> Error {
        let operation = state.scheduled;
        if state.bug.is_none() {
            let mut strategy = self.strategy.lock();
            strategy.notify_bug_found();
            tracing::error!(
                ?kind,
                op = ?operation,
                strategy = %strategy.description(),
                steps = strategy.scheduled_steps(),
                "{message}"
            );
            state.bug = Some(BugReport {
                kind,
                message: message.clone(),
                operation,
            });
        }
        self.halt(state);

        let error = Error::new(kind).with_message(message);
        match operation {
            Some(op) => error.with_operation(op),
            None => error,
        }
    }

    fn halt(&self, state: &mut SchedulerState) {
        if state.running {
            tracing::debug!(operations = state.operations.len(), "stopping scheduler");
        }
        state.running = false;
        for op in state.operations.values_mut() {
            op.set_status(OperationStatus::Completed);
            op.set_active(true);
        }
        for parker in state.parkers.values() {
            parker.notify_all();
        }
        self.stopped.notify_all();
    }
}

fn try_enable_blocked(state: &mut SchedulerState) {
    let completed: BTreeSet<OperationId> = state
        .operations
        .values()
        .filter(|op| op.status() == OperationStatus::Completed)
        .map(AsyncOperation::id)
        .collect();
    for op in state.operations.values_mut() {
        if op.try_enable(|dep| completed.contains(&dep)) {
            tracing::trace!(op = %op.id(), "join dependencies satisfied");
        }
    }
}

/// Describes every blocked operation, or `None` if nothing is blocked.
fn livelock_message(state: &SchedulerState) -> Option<String> {
    let receive = names_with(state, |s| s == OperationStatus::BlockedOnReceive);
    let wait = names_with(state, |s| {
        matches!(
            s,
            OperationStatus::BlockedOnWaitAll | OperationStatus::BlockedOnWaitAny
        )
    });
    let resource = names_with(state, |s| s == OperationStatus::BlockedOnResource);
    if receive.is_empty() && wait.is_empty() && resource.is_empty() {
        return None;
    }

    let mut message = String::from("Livelock detected.");
    let clauses = [
        (receive, "waiting to receive an event"),
        (wait, "waiting for a task to complete"),
        (
            resource,
            "waiting to access a concurrent resource that is acquired by another task",
        ),
    ];
    for (ops, reason) in clauses {
        if ops.is_empty() {
            continue;
        }
        message.push_str(&join_names(&ops));
        message.push_str(if ops.len() == 1 { " is " } else { " are " });
        message.push_str(reason);
        message.push_str(", but no other controlled tasks are enabled.");
    }
    Some(message)
}

fn names_with(state: &SchedulerState, pred: impl Fn(OperationStatus) -> bool) -> Vec<&str> {
    state
        .operations
        .values()
        .filter(|op| pred(op.status()))
        .map(AsyncOperation::name)
        .collect()
}

/// `" 'a'"`, `" 'a' and 'b'"`, `" 'a', 'b' and 'c'"`.
fn join_names(names: &[&str]) -> String {
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        out.push_str(&format!(" '{name}'"));
        if i + 2 == names.len() {
            out.push_str(" and");
        } else if i + 1 < names.len() {
            out.push(',');
        }
    }
    out
}
