//! Exhaustive depth-first schedule enumeration.
//!
//! The strategy keeps one choice list per decision depth. Each entry is
//! marked `done` once the subtree below it has been fully explored, so the
//! current schedule is always "the first undone entry at every depth".
//! Backtracking marks the deepest current entry done and pops lists whose
//! entries are all done; when the stack empties, every schedule has been
//! visited.
//!
//! The enumeration is only meaningful for programs whose set of enabled
//! operations at a depth depends solely on the decisions above it. When a
//! replayed prefix no longer matches the program, the strategy gives up on
//! the iteration.

use super::exploration::{self, StepCounter};
use super::SchedulingStrategy;
use crate::runtime::{AsyncOperation, OperationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChoiceValue {
    Operation(OperationId),
    Boolean(bool),
    Integer(u32),
}

#[derive(Debug, Clone, Copy)]
struct Choice {
    value: ChoiceValue,
    done: bool,
}

/// Depth-first enumeration of every schedule.
#[derive(Debug, Clone)]
pub struct DfsStrategy {
    stack: Vec<Vec<Choice>>,
    index: usize,
    steps: StepCounter,
    mismatch: Option<String>,
}

impl DfsStrategy {
    /// Creates a DFS strategy bounded by `max_steps` decisions per iteration.
    #[must_use]
    pub const fn new(max_steps: u64) -> Self {
        Self {
            stack: Vec::new(),
            index: 0,
            steps: StepCounter::new(max_steps),
            mismatch: None,
        }
    }

    /// Depth of the choice stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn next_choice(&mut self, alternatives: impl FnOnce() -> Vec<ChoiceValue>) -> Option<ChoiceValue> {
        if self.index >= self.stack.len() {
            let list: Vec<Choice> = alternatives()
                .into_iter()
                .map(|value| Choice { value, done: false })
                .collect();
            if list.is_empty() {
                return None;
            }
            self.stack.push(list);
        }

        let value = self.stack[self.index]
            .iter()
            .find(|choice| !choice.done)?
            .value;
        self.index += 1;
        self.steps.increment();
        Some(value)
    }

    fn prefix_mismatch(&mut self, found: ChoiceValue, requested: &str) {
        let message = format!(
            "depth {} recorded {found:?} but the program requested {requested}",
            self.index - 1
        );
        tracing::debug!(%message, "dfs prefix no longer matches the program");
        self.mismatch = Some(message);
    }
}

impl SchedulingStrategy for DfsStrategy {
    fn get_next(&mut self, _current: &AsyncOperation, ops: &[&AsyncOperation]) -> Option<OperationId> {
        let enabled = exploration::enabled(ops);
        if enabled.is_empty() {
            return None;
        }

        match self.next_choice(|| {
            enabled
                .iter()
                .map(|op| ChoiceValue::Operation(op.id()))
                .collect()
        })? {
            ChoiceValue::Operation(id) if exploration::is_enabled(ops, id) => Some(id),
            other => {
                self.prefix_mismatch(other, "an enabled operation");
                None
            }
        }
    }

    fn get_next_boolean_choice(&mut self, _current: &AsyncOperation, _max_value: u32) -> Option<bool> {
        match self.next_choice(|| vec![ChoiceValue::Boolean(false), ChoiceValue::Boolean(true)])? {
            ChoiceValue::Boolean(value) => Some(value),
            other => {
                self.prefix_mismatch(other, "a boolean");
                None
            }
        }
    }

    fn get_next_integer_choice(&mut self, _current: &AsyncOperation, max_value: u32) -> Option<u32> {
        match self.next_choice(|| (0..max_value).map(ChoiceValue::Integer).collect())? {
            ChoiceValue::Integer(value) if value < max_value => Some(value),
            other => {
                self.prefix_mismatch(other, "an integer");
                None
            }
        }
    }

    fn notify_bug_found(&mut self) {}

    fn prepare_for_next_iteration(&mut self) -> bool {
        // Lists below the depth this iteration reached belong to a path that
        // was not taken.
        self.stack.truncate(self.index);
        self.index = 0;
        self.steps.reset();
        self.mismatch = None;

        while let Some(top) = self.stack.last_mut() {
            if let Some(current) = top.iter_mut().find(|choice| !choice.done) {
                current.done = true;
            }
            if top.iter().all(|choice| choice.done) {
                self.stack.pop();
            } else {
                return true;
            }
        }
        false
    }

    fn scheduled_steps(&self) -> u64 {
        self.steps.steps()
    }

    fn max_steps(&self) -> u64 {
        self.steps.max_steps()
    }

    fn divergence(&self) -> Option<&str> {
        self.mismatch.as_deref()
    }

    fn is_fair(&self) -> bool {
        false
    }

    fn description(&self) -> String {
        "DFS".to_string()
    }
}
