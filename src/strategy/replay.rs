//! Trace replay.

use super::SchedulingStrategy;
use crate::runtime::{AsyncOperation, OperationId};
use crate::trace::{ScheduleStep, ScheduleTrace};

/// Re-issues the decisions of a recorded [`ScheduleTrace`].
///
/// If the program asks for a decision the trace cannot supply (wrong kind,
/// an operation that is not enabled, or the trace ran out), the strategy
/// records the divergence and stops offering decisions.
#[derive(Debug, Clone)]
pub struct ReplayStrategy {
    trace: ScheduleTrace,
    index: usize,
    divergence: Option<String>,
}

impl ReplayStrategy {
    /// Creates a strategy replaying `trace`.
    #[must_use]
    pub const fn new(trace: ScheduleTrace) -> Self {
        Self {
            trace,
            index: 0,
            divergence: None,
        }
    }

    /// True once every recorded decision has been re-issued.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.index == self.trace.len()
    }

    fn next_step(&mut self, requested: &str) -> Option<ScheduleStep> {
        if self.divergence.is_some() {
            return None;
        }
        if let Some(step) = self.trace.get(self.index) {
            self.index += 1;
            return Some(step.clone());
        }
        self.diverge(format!(
            "trace ended after {} steps but the program requested a {requested}",
            self.trace.len()
        ));
        None
    }

    fn diverge(&mut self, message: String) {
        tracing::warn!(step = self.index, %message, "replay diverged");
        self.divergence = Some(message);
    }
}

impl SchedulingStrategy for ReplayStrategy {
    fn get_next(&mut self, _current: &AsyncOperation, ops: &[&AsyncOperation]) -> Option<OperationId> {
        if !ops.iter().any(|op| op.is_enabled()) {
            return None;
        }
        match self.next_step("scheduling decision")? {
            ScheduleStep::Scheduled { source_id }
                if ops.iter().any(|op| op.id() == source_id && op.is_enabled()) =>
            {
                Some(source_id)
            }
            other => {
                self.diverge(format!(
                    "step {} expected {other:?} but the program requested a scheduling decision",
                    self.index - 1
                ));
                None
            }
        }
    }

    fn get_next_boolean_choice(&mut self, _current: &AsyncOperation, _max_value: u32) -> Option<bool> {
        match self.next_step("boolean choice")? {
            ScheduleStep::Boolean { value } | ScheduleStep::FairBoolean { value, .. } => Some(value),
            other => {
                self.diverge(format!(
                    "step {} expected {other:?} but the program requested a boolean choice",
                    self.index - 1
                ));
                None
            }
        }
    }

    fn get_next_integer_choice(&mut self, _current: &AsyncOperation, max_value: u32) -> Option<u32> {
        match self.next_step("integer choice")? {
            ScheduleStep::Integer { value } if value < max_value => Some(value),
            other => {
                self.diverge(format!(
                    "step {} expected {other:?} but the program requested an integer choice below {max_value}",
                    self.index - 1
                ));
                None
            }
        }
    }

    fn notify_bug_found(&mut self) {}

    fn prepare_for_next_iteration(&mut self) -> bool {
        false
    }

    fn scheduled_steps(&self) -> u64 {
        self.index as u64
    }

    fn max_steps(&self) -> u64 {
        if self.trace.metadata.ended_on_bound {
            self.trace.metadata.step_bound
        } else {
            0
        }
    }

    /// A trace cut short by the step bound is reached again once every
    /// recorded step has been re-issued.
    fn has_reached_max_steps(&self) -> bool {
        self.trace.metadata.ended_on_bound && self.is_complete()
    }

    fn divergence(&self) -> Option<&str> {
        self.divergence.as_deref()
    }

    fn is_fair(&self) -> bool {
        false
    }

    fn description(&self) -> String {
        format!("Replay[{} steps]", self.trace.len())
    }
}
