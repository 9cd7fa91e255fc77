//! Controlled execution: operations, the scheduler and its handle.
//!
//! - [`operation`]: the scheduler-side record of one controlled operation
//! - [`state`]: hashed execution state at several abstraction levels
//! - [`scheduler`]: the run-to-block operation scheduler
//! - [`report`]: per-iteration and campaign summaries
//! - [`handle`]: the handle controlled code receives

pub mod handle;
pub mod operation;
pub mod report;
pub mod scheduler;
pub mod state;

pub use handle::ControlledRuntime;
pub use operation::{
    AsyncOperation, OperationId, OperationStatus, OperationTarget, OperationType, WaitMode,
};
pub use report::{BugReport, IterationStats, TestReport};
pub use scheduler::{OperationScheduler, SchedulerOptions};
pub use state::{AbstractionLevel, HashedState, OperationStateHasher, StateHasher};
