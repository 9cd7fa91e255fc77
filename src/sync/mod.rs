//! Synchronization primitives whose blocking points are scheduled.
//!
//! - [`ControlledLock`] / [`ControlledMutex`]: mutual exclusion
//! - [`TaskHandle`]: spawned tasks and their results
//!
//! Every blocking call routes through the operation scheduler instead of the
//! OS scheduler, so each suspension is a recorded, replayable decision.

pub mod lock;
pub mod task;

pub use lock::{ControlledLock, ControlledMutex, ControlledMutexGuard, LockGuard};
pub use task::TaskHandle;
