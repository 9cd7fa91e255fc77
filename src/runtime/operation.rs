//! Controlled operations.
//!
//! An [`AsyncOperation`] is the scheduler's view of one unit of controlled
//! work running on its own OS thread. The scheduler owns every operation in
//! its registry; strategies only ever see shared references.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::state::{AbstractionLevel, HashedState};

/// Unique identifier of an operation within one iteration.
///
/// Ids are handed out sequentially from zero in creation order, so they stay
/// far below the reserved choice sentinels used by the strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    /// Creates an id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Scheduling status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Runnable.
    Enabled,
    /// Waiting for an event to be delivered.
    BlockedOnReceive,
    /// Waiting for all of its join dependencies to complete.
    BlockedOnWaitAll,
    /// Waiting for any of its join dependencies to complete.
    BlockedOnWaitAny,
    /// Waiting for a controlled lock.
    BlockedOnResource,
    /// Finished or force-terminated. Never leaves this status.
    Completed,
}

impl OperationStatus {
    /// Returns true for every blocked status.
    #[must_use]
    pub const fn is_blocked(self) -> bool {
        matches!(
            self,
            Self::BlockedOnReceive
                | Self::BlockedOnWaitAll
                | Self::BlockedOnWaitAny
                | Self::BlockedOnResource
        )
    }

    const fn tag(self) -> u8 {
        match self {
            Self::Enabled => 0,
            Self::BlockedOnReceive => 1,
            Self::BlockedOnWaitAll => 2,
            Self::BlockedOnWaitAny => 3,
            Self::BlockedOnResource => 4,
            Self::Completed => 5,
        }
    }
}

/// The kind of scheduling point an operation is paused at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// The operation has not reached a scheduling point yet.
    Start,
    /// Created a child operation.
    Create,
    /// Voluntary context switch (yield, delay, injected switch).
    Yield,
    /// Waiting on other operations.
    Join,
    /// Acquiring a controlled lock.
    Acquire,
    /// Releasing a controlled lock.
    Release,
    /// Sending an event.
    Send,
    /// Receiving an event.
    Receive,
    /// About to inject a failure.
    InjectFailure,
    /// Finished.
    Stop,
}

impl OperationType {
    const fn tag(self) -> u8 {
        match self {
            Self::Start => 0,
            Self::Create => 1,
            Self::Yield => 2,
            Self::Join => 3,
            Self::Acquire => 4,
            Self::Release => 5,
            Self::Send => 6,
            Self::Receive => 7,
            Self::InjectFailure => 8,
            Self::Stop => 9,
        }
    }
}

/// What a scheduling point acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationTarget {
    /// Another operation (or the caller itself).
    Task,
    /// A controlled lock.
    Lock,
    /// An event inbox.
    Inbox,
}

impl OperationTarget {
    const fn tag(self) -> u8 {
        match self {
            Self::Task => 0,
            Self::Lock => 1,
            Self::Inbox => 2,
        }
    }
}

/// How a blocked join waits on its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Every dependency must complete.
    All,
    /// One dependency completing is enough.
    Any,
}

/// The scheduler-side record of one controlled operation.
#[derive(Debug, Clone)]
pub struct AsyncOperation {
    id: OperationId,
    name: String,
    status: OperationStatus,
    pending_type: OperationType,
    target: OperationTarget,
    target_id: u64,
    hashed_state: HashedState,
    is_active: bool,
    is_handler_running: bool,
    join_dependencies: Vec<OperationId>,
}

impl AsyncOperation {
    /// Creates an enabled operation that has not started yet.
    #[must_use]
    pub fn new(id: OperationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: OperationStatus::Enabled,
            pending_type: OperationType::Start,
            target: OperationTarget::Task,
            target_id: id.as_u64(),
            hashed_state: HashedState::default(),
            is_active: false,
            is_handler_running: false,
            join_dependencies: Vec::new(),
        }
    }

    /// Returns the operation id.
    #[must_use]
    pub const fn id(&self) -> OperationId {
        self.id
    }

    /// Returns the human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> OperationStatus {
        self.status
    }

    /// Returns true if the operation may be scheduled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self.status, OperationStatus::Enabled)
    }

    /// Returns the type of the scheduling point the operation is paused at.
    #[must_use]
    pub const fn pending_type(&self) -> OperationType {
        self.pending_type
    }

    /// Returns the target of the pending scheduling point.
    #[must_use]
    pub const fn target(&self) -> OperationTarget {
        self.target
    }

    /// Returns the id of the target of the pending scheduling point.
    #[must_use]
    pub const fn target_id(&self) -> u64 {
        self.target_id
    }

    /// Returns the state hash last captured for this operation at `level`.
    #[must_use]
    pub const fn hashed_state(&self, level: AbstractionLevel) -> u64 {
        self.hashed_state.get(level)
    }

    /// Returns true while this operation holds the execution token.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Returns true while the operation's thread is running its body.
    #[must_use]
    pub const fn is_handler_running(&self) -> bool {
        self.is_handler_running
    }

    /// Returns the operations a blocked join is waiting on.
    #[must_use]
    pub fn join_dependencies(&self) -> &[OperationId] {
        &self.join_dependencies
    }

    pub(crate) fn set_status(&mut self, status: OperationStatus) {
        self.status = status;
    }

    pub(crate) fn set_pending(
        &mut self,
        pending_type: OperationType,
        target: OperationTarget,
        target_id: u64,
    ) {
        self.pending_type = pending_type;
        self.target = target;
        self.target_id = target_id;
    }

    pub(crate) fn set_hashed_state(&mut self, state: HashedState) {
        self.hashed_state = state;
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    pub(crate) fn set_handler_running(&mut self, running: bool) {
        self.is_handler_running = running;
    }

    pub(crate) fn block_on(&mut self, dependencies: Vec<OperationId>, mode: WaitMode) {
        self.join_dependencies = dependencies;
        self.status = match mode {
            WaitMode::All => OperationStatus::BlockedOnWaitAll,
            WaitMode::Any => OperationStatus::BlockedOnWaitAny,
        };
    }

    /// Re-enables a blocked join once its dependencies allow it.
    ///
    /// `is_completed` reports whether a dependency has completed. Operations
    /// blocked on anything other than a join are left untouched.
    pub(crate) fn try_enable(&mut self, is_completed: impl Fn(OperationId) -> bool) -> bool {
        let ready = match self.status {
            OperationStatus::BlockedOnWaitAll => {
                self.join_dependencies.iter().all(|dep| is_completed(*dep))
            }
            OperationStatus::BlockedOnWaitAny => {
                self.join_dependencies.iter().any(|dep| is_completed(*dep))
            }
            _ => false,
        };
        if ready {
            self.status = OperationStatus::Enabled;
            self.join_dependencies.clear();
        }
        ready
    }

    /// Feeds the fields that identify this operation's scheduling situation
    /// into `hasher`. `full` adds the pending target.
    pub(crate) fn hash_into(&self, hasher: &mut impl std::hash::Hasher, with_type: bool, full: bool) {
        hasher.write_u64(self.id.as_u64());
        hasher.write_u8(self.status.tag());
        if with_type {
            hasher.write_u8(self.pending_type.tag());
        }
        if full {
            hasher.write_u8(self.target.tag());
            hasher.write_u64(self.target_id);
        }
    }
}
