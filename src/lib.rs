//! Stepwise: systematic concurrency testing for multi-threaded Rust code.
//!
//! # Overview
//!
//! Stepwise runs a concurrent program many times, each time under a
//! different interleaving chosen by a scheduling strategy. Controlled
//! operations run on real OS threads, but only one of them executes at any
//! instant; every synchronization point hands control back to the
//! scheduler, which records the decision so a buggy interleaving can be
//! replayed exactly.
//!
//! # Core Guarantees
//!
//! - **Run-to-block**: at most one controlled operation runs at a time
//! - **Reproducibility**: the same seed and program yield the same schedules
//! - **Replay**: a recorded [`ScheduleTrace`] reproduces its iteration
//! - **No hangs**: stopping an iteration wakes and cancels every operation
//! - **Bug detection**: assertion failures, panics, livelocks and
//!   uncontrolled concurrency are reported as bugs
//!
//! # Module Structure
//!
//! - [`runtime`]: operations, the operation scheduler and its handle
//! - [`strategy`]: scheduling strategies (DFS, random, PCT, Q-learning, ...)
//! - [`sync`]: controlled locks and tasks
//! - [`trace`]: schedule traces and their codecs
//! - [`engine`]: the iteration driver
//! - [`config`]: test configuration and environment overrides
//! - [`workloads`]: sample programs with known bugs
//! - [`util`]: deterministic RNG and hashing
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stepwise::{ControlledMutex, StrategyKind, TestConfig, TestingEngine};
//!
//! let config = TestConfig::new(42).strategy(StrategyKind::Dfs).iterations(1_000);
//! let mut engine = TestingEngine::new(config)?;
//! let report = engine.run(|rt| {
//!     let counter = Arc::new(ControlledMutex::new(rt, 0_u32));
//!     let c = Arc::clone(&counter);
//!     let task = rt.spawn("incr", move |rt| {
//!         *c.lock(&rt)? += 1;
//!         Ok(())
//!     })?;
//!     *counter.lock(rt)? += 1;
//!     rt.join(task)?;
//!     let value = *counter.lock(rt)?;
//!     rt.assert(value == 2, format!("lost update: {value}"))
//! });
//! assert!(!report.has_bugs());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod engine;
pub mod error;
pub mod runtime;
pub mod strategy;
pub mod sync;
pub mod test_utils;
pub mod trace;
pub mod util;
pub mod workloads;

// Re-exports for convenient access to core types
pub use config::{StrategyKind, TestConfig};
pub use engine::{ExplorationReport, IterationResult, ReplayReport, TestingEngine};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use runtime::{
    AbstractionLevel, AsyncOperation, BugReport, ControlledRuntime, OperationId,
    OperationScheduler, OperationStatus, OperationTarget, OperationType, StateHasher, TestReport,
};
pub use strategy::{SchedulingStrategy, Strategy};
pub use sync::{ControlledLock, ControlledMutex, TaskHandle};
pub use trace::{ScheduleStep, ScheduleTrace, TraceError, TraceMetadata};
pub use workloads::{FibBench, LockCycle, LockedJoin, Workload};
