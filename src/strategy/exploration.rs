//! Bookkeeping shared by the exploration strategies.
//!
//! Strategies that learn across iterations need a uniform id space for
//! "what was chosen here": operation ids for scheduling decisions and
//! reserved sentinel ids at the top of the `u64` range for nondeterministic
//! choices. Operation ids are assigned sequentially from zero and can never
//! reach the sentinel range.

use crate::runtime::{AbstractionLevel, AsyncOperation, OperationId, OperationType};
use crate::util::DetHashSet;

/// Action id standing for the boolean choice `true`.
pub const TRUE_CHOICE: u64 = u64::MAX;
/// Action id standing for the boolean choice `false`.
pub const FALSE_CHOICE: u64 = u64::MAX - 1;
/// Action id standing for the integer choice `0`; value `i` maps to `MIN_INTEGER_CHOICE - i`.
pub const MIN_INTEGER_CHOICE: u64 = u64::MAX - 2;

/// Maps a boolean choice to its action id.
#[must_use]
pub const fn boolean_action(value: bool) -> u64 {
    if value {
        TRUE_CHOICE
    } else {
        FALSE_CHOICE
    }
}

/// Maps an integer choice to its action id.
#[must_use]
pub const fn integer_action(value: u32) -> u64 {
    MIN_INTEGER_CHOICE - value as u64
}

/// Maps an integer action id back to its value.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn integer_value(action: u64) -> u32 {
    (MIN_INTEGER_CHOICE - action) as u32
}

/// Returns the enabled operations of `ops`, keeping their order.
#[must_use]
pub fn enabled<'a>(ops: &[&'a AsyncOperation]) -> Vec<&'a AsyncOperation> {
    ops.iter().copied().filter(|op| op.is_enabled()).collect()
}

/// Returns true if `id` names an enabled operation of `ops`.
#[must_use]
pub fn is_enabled(ops: &[&AsyncOperation], id: OperationId) -> bool {
    ops.iter().any(|op| op.id() == id && op.is_enabled())
}

/// Counts the decisions taken in the current iteration against a bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepCounter {
    steps: u64,
    max_steps: u64,
}

impl StepCounter {
    /// Creates a counter; a `max_steps` of zero means unbounded.
    #[must_use]
    pub const fn new(max_steps: u64) -> Self {
        Self {
            steps: 0,
            max_steps,
        }
    }

    /// Decisions taken so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// The configured bound.
    #[must_use]
    pub const fn max_steps(&self) -> u64 {
        self.max_steps
    }

    /// True once the bound is non-zero and has been reached.
    #[must_use]
    pub const fn reached(&self) -> bool {
        self.max_steps != 0 && self.steps >= self.max_steps
    }

    /// Counts one decision.
    pub fn increment(&mut self) {
        self.steps += 1;
    }

    /// Starts a new iteration.
    pub fn reset(&mut self) {
        self.steps = 0;
    }
}

/// One decision point of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStep {
    /// Digest of the program state at the decision point.
    pub state: u64,
    /// The scheduling point the current operation was paused at.
    pub kind: OperationType,
    /// The operation or choice taken, once decided.
    pub action: Option<u64>,
}

/// The decision points of the current iteration, in order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPath {
    steps: Vec<PathStep>,
}

impl ExecutionPath {
    /// Records a new decision point.
    pub fn record(&mut self, state: u64, kind: OperationType) {
        self.steps.push(PathStep {
            state,
            kind,
            action: None,
        });
    }

    /// Records the action taken at the latest decision point.
    pub fn take_action(&mut self, action: u64) {
        if let Some(step) = self.steps.last_mut() {
            step.action = Some(action);
        }
    }

    /// Returns the recorded steps.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Iterates over consecutive `(from, to)` decision points whose `from`
    /// step has an action.
    pub fn transitions(&self) -> impl Iterator<Item = (u64, u64, &PathStep)> + '_ {
        self.steps.windows(2).filter_map(|pair| {
            let from = pair[0];
            from.action.map(|action| (from.state, action, &pair[1]))
        })
    }

    /// Returns the number of recorded steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Forgets the recorded steps.
    pub fn clear(&mut self) {
        self.steps.clear();
    }
}

/// The distinct states visited so far, per abstraction level.
#[derive(Debug, Clone, Default)]
pub struct StateCoverage {
    visited: [DetHashSet<u64>; 4],
}

impl StateCoverage {
    /// Records every digest of `op`'s current state.
    pub fn capture(&mut self, op: &AsyncOperation) {
        for (set, level) in self.visited.iter_mut().zip(AbstractionLevel::ALL) {
            set.insert(op.hashed_state(level));
        }
    }

    /// Number of distinct states seen at `level`.
    #[must_use]
    pub fn distinct_states(&self, level: AbstractionLevel) -> usize {
        let index = AbstractionLevel::ALL
            .iter()
            .position(|l| *l == level)
            .unwrap_or_default();
        self.visited[index].len()
    }
}
