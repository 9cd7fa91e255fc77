//! Small concurrent programs with known bugs, used by the CLI and tests.

use core::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::runtime::ControlledRuntime;
use crate::sync::{ControlledLock, ControlledMutex};

/// Two tasks growing a Fibonacci pair under a shared lock.
///
/// One task runs `i += j`, the other `j += i`, each `num` times with a
/// context switch before every locked update. Only a perfectly alternating
/// schedule lets a value reach [`FibBench::max_value`], which the final
/// assertion treats as a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibBench {
    /// Updates per task.
    pub num: u32,
    /// A final value at or above this is reported as a bug.
    pub threshold: u64,
}

impl FibBench {
    /// Creates the benchmark with the threshold set to the largest reachable value.
    #[must_use]
    pub const fn new(num: u32) -> Self {
        Self {
            num,
            threshold: Self::max_value(num),
        }
    }

    /// Overrides the bug threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// The largest value either cell can reach after `num` updates per task.
    #[must_use]
    pub const fn max_value(num: u32) -> u64 {
        let (mut i, mut j) = (1_u64, 1_u64);
        let mut k = 0;
        while k < num {
            i += j;
            j += i;
            k += 1;
        }
        j
    }

    /// Runs the benchmark as the body of the root operation.
    ///
    /// # Errors
    ///
    /// Returns the assertion failure when the threshold is reached, or
    /// `ExecutionCanceled` once the iteration is over.
    pub fn run(self, rt: &ControlledRuntime) -> Result<()> {
        let cells = Arc::new(ControlledMutex::new(rt, (1_u64, 1_u64)));

        let left = {
            let cells = Arc::clone(&cells);
            let num = self.num;
            rt.spawn("fib-i", move |rt| {
                for _ in 0..num {
                    rt.inject_context_switch()?;
                    let mut guard = cells.lock(&rt)?;
                    guard.0 += guard.1;
                }
                Ok(())
            })?
        };
        let right = {
            let cells = Arc::clone(&cells);
            let num = self.num;
            rt.spawn("fib-j", move |rt| {
                for _ in 0..num {
                    rt.inject_context_switch()?;
                    let mut guard = cells.lock(&rt)?;
                    guard.1 += guard.0;
                }
                Ok(())
            })?
        };

        rt.wait_all(&[left.id(), right.id()])?;
        let (i, j) = *cells.lock(rt)?;
        rt.assert(
            i < self.threshold && j < self.threshold,
            format!("Fib bench bug found: i = {i}, j = {j}"),
        )
    }
}

impl Default for FibBench {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Two tasks taking two locks in opposite order.
///
/// Schedules that let each task take its first lock before the other
/// takes its second end in a livelock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockCycle;

impl LockCycle {
    /// Runs the workload as the body of the root operation.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over.
    pub fn run(self, rt: &ControlledRuntime) -> Result<()> {
        let first = Arc::new(ControlledLock::new(rt));
        let second = Arc::new(ControlledLock::new(rt));

        let forward = {
            let (a, b) = (Arc::clone(&first), Arc::clone(&second));
            rt.spawn("forward", move |rt| {
                let _a = a.acquire(&rt)?;
                rt.yield_now()?;
                let _b = b.acquire(&rt)?;
                Ok(())
            })?
        };
        let backward = {
            let (a, b) = (Arc::clone(&first), Arc::clone(&second));
            rt.spawn("backward", move |rt| {
                let _b = b.acquire(&rt)?;
                rt.yield_now()?;
                let _a = a.acquire(&rt)?;
                Ok(())
            })?
        };

        rt.wait_all(&[forward.id(), backward.id()])
    }
}

/// The root operation joins a task while holding the lock that task needs.
///
/// Every schedule ends in a livelock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockedJoin;

impl LockedJoin {
    /// Runs the workload as the body of the root operation.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionCanceled` once the iteration is over.
    pub fn run(self, rt: &ControlledRuntime) -> Result<()> {
        let lock = Arc::new(ControlledLock::new(rt));
        let _held = lock.acquire(rt)?;

        let child = {
            let lock = Arc::clone(&lock);
            rt.spawn("child", move |rt| {
                let _guard = lock.acquire(&rt)?;
                Ok(())
            })?
        };
        rt.join(child)
    }
}

/// The workloads selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// [`FibBench`].
    Fib(FibBench),
    /// [`LockCycle`].
    LockCycle,
    /// [`LockedJoin`].
    LockedJoin,
}

impl Workload {
    /// Every workload name accepted by [`FromStr`].
    pub const NAMES: [&'static str; 3] = ["fib", "lock-cycle", "locked-join"];

    /// Runs the workload as the body of the root operation.
    ///
    /// # Errors
    ///
    /// Propagates the workload's failure.
    pub fn run(self, rt: &ControlledRuntime) -> Result<()> {
        match self {
            Self::Fib(bench) => bench.run(rt),
            Self::LockCycle => LockCycle.run(rt),
            Self::LockedJoin => LockedJoin.run(rt),
        }
    }

    /// Returns the workload's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fib(_) => "fib",
            Self::LockCycle => "lock-cycle",
            Self::LockedJoin => "locked-join",
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Workload {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fib" => Ok(Self::Fib(FibBench::default())),
            "lock-cycle" => Ok(Self::LockCycle),
            "locked-join" => Ok(Self::LockedJoin),
            other => Err(Error::invalid_config(format!(
                "unknown workload '{other}', expected one of {}",
                Self::NAMES.join(", ")
            ))),
        }
    }
}
