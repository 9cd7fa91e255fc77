//! Delay-bounded round-robin scheduling.
//!
//! Without delays the strategy is a deterministic round-robin starting from
//! the current operation, so the current operation keeps running while it
//! is enabled. At `k` delay points, chosen like PCT change points from the
//! longest schedule seen so far, the operation that would have run is
//! skipped in favour of the next one in round-robin order.

use std::collections::BTreeSet;

use super::exploration::{self, StepCounter};
use super::SchedulingStrategy;
use crate::runtime::{AsyncOperation, OperationId};
use crate::util::DetRng;

/// Round-robin scheduling with at most `k` random delays per iteration.
#[derive(Debug, Clone)]
pub struct DelayBoundingStrategy {
    rng: DetRng,
    steps: StepCounter,
    max_delays: usize,
    schedule_length: u64,
    delay_points: BTreeSet<u64>,
}

impl DelayBoundingStrategy {
    /// Creates the strategy with `max_delays` delays per iteration.
    #[must_use]
    pub const fn new(seed: u64, max_steps: u64, max_delays: usize) -> Self {
        Self {
            rng: DetRng::new(seed),
            steps: StepCounter::new(max_steps),
            max_delays,
            schedule_length: 0,
            delay_points: BTreeSet::new(),
        }
    }

    /// Delay points of the current iteration, ascending.
    #[must_use]
    pub fn delay_points(&self) -> Vec<u64> {
        self.delay_points.iter().copied().collect()
    }
}

impl SchedulingStrategy for DelayBoundingStrategy {
    fn get_next(&mut self, current: &AsyncOperation, ops: &[&AsyncOperation]) -> Option<OperationId> {
        let enabled = exploration::enabled(ops);
        if enabled.is_empty() {
            return None;
        }

        // Round-robin order starting at the current operation.
        let start = enabled
            .iter()
            .position(|op| op.id() >= current.id())
            .unwrap_or(0);
        let mut index = start;
        if self.delay_points.remove(&self.steps.steps()) {
            index = (start + 1) % enabled.len();
            tracing::trace!(step = self.steps.steps(), "delay bounding: delaying operation");
        }

        self.steps.increment();
        Some(enabled[index].id())
    }

    fn get_next_boolean_choice(&mut self, _current: &AsyncOperation, max_value: u32) -> Option<bool> {
        self.steps.increment();
        Some(self.rng.next_below(max_value.max(1)) == 0)
    }

    fn get_next_integer_choice(&mut self, _current: &AsyncOperation, max_value: u32) -> Option<u32> {
        if max_value == 0 {
            return None;
        }
        self.steps.increment();
        Some(self.rng.next_below(max_value))
    }

    fn notify_bug_found(&mut self) {}

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.schedule_length = self.schedule_length.max(self.steps.steps());
        self.steps.reset();
        self.delay_points.clear();

        let mut range: Vec<u64> = (0..self.schedule_length).collect();
        self.rng.shuffle(&mut range);
        self.delay_points.extend(range.into_iter().take(self.max_delays));
        true
    }

    fn scheduled_steps(&self) -> u64 {
        self.steps.steps()
    }

    fn max_steps(&self) -> u64 {
        self.steps.max_steps()
    }

    fn is_fair(&self) -> bool {
        false
    }

    fn description(&self) -> String {
        format!(
            "DelayBounding[delays '{}', seed '{}']",
            self.max_delays,
            self.rng.seed()
        )
    }
}
