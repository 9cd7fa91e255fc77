//! Probabilistic concurrency testing.
//!
//! Operations get distinct priorities as they are discovered and the
//! highest-priority enabled operation always runs. At `k` change points,
//! drawn uniformly from the length of the longest schedule seen so far, the
//! running operation is demoted to the lowest priority. A bug of depth
//! `d <= k + 1` is found with probability at least `1 / (n * L^(d-1))`.

use std::collections::BTreeSet;

use super::exploration::{self, StepCounter};
use super::SchedulingStrategy;
use crate::runtime::{AsyncOperation, OperationId};
use crate::util::DetRng;

/// Priority-based scheduling with random priority change points.
#[derive(Debug, Clone)]
pub struct PctStrategy {
    rng: DetRng,
    steps: StepCounter,
    max_change_points: usize,
    schedule_length: u64,
    priorities: Vec<OperationId>,
    change_points: BTreeSet<u64>,
}

impl PctStrategy {
    /// Creates a PCT strategy with `max_change_points` priority change points.
    #[must_use]
    pub const fn new(seed: u64, max_steps: u64, max_change_points: usize) -> Self {
        Self {
            rng: DetRng::new(seed),
            steps: StepCounter::new(max_steps),
            max_change_points,
            schedule_length: 0,
            priorities: Vec::new(),
            change_points: BTreeSet::new(),
        }
    }

    /// Change points of the current iteration, ascending.
    #[must_use]
    pub fn change_points(&self) -> Vec<u64> {
        self.change_points.iter().copied().collect()
    }

    /// Longest schedule observed so far.
    #[must_use]
    pub const fn schedule_length(&self) -> u64 {
        self.schedule_length
    }

    /// Current priority order, highest first.
    #[must_use]
    pub fn priorities(&self) -> &[OperationId] {
        &self.priorities
    }

    fn discover(&mut self, current: &AsyncOperation, enabled: &[&AsyncOperation]) {
        if self.priorities.is_empty() {
            self.priorities.push(current.id());
        }
        for op in enabled {
            if !self.priorities.contains(&op.id()) {
                let index = self.rng.next_usize(self.priorities.len()) + 1;
                self.priorities.insert(index, op.id());
                tracing::trace!(op = %op.id(), index, "pct: new operation prioritized");
            }
        }
    }

    fn highest_enabled(&self, enabled: &[&AsyncOperation]) -> Option<OperationId> {
        self.priorities
            .iter()
            .copied()
            .find(|id| enabled.iter().any(|op| op.id() == *id))
    }

    fn move_change_point_forward(&mut self) {
        let step = self.steps.steps();
        self.change_points.remove(&step);
        let mut next = step + 1;
        while self.change_points.contains(&next) {
            next += 1;
        }
        self.change_points.insert(next);
    }
}

impl SchedulingStrategy for PctStrategy {
    fn get_next(&mut self, current: &AsyncOperation, ops: &[&AsyncOperation]) -> Option<OperationId> {
        let enabled = exploration::enabled(ops);
        if enabled.is_empty() {
            return None;
        }
        self.discover(current, &enabled);

        if self.change_points.contains(&self.steps.steps()) {
            if enabled.len() == 1 {
                self.move_change_point_forward();
            } else if let Some(demoted) = self.highest_enabled(&enabled) {
                self.priorities.retain(|id| *id != demoted);
                self.priorities.push(demoted);
                tracing::trace!(op = %demoted, step = self.steps.steps(), "pct: priority demoted");
            }
        }

        let next = self.highest_enabled(&enabled)?;
        self.steps.increment();
        Some(next)
    }

    fn get_next_boolean_choice(&mut self, _current: &AsyncOperation, max_value: u32) -> Option<bool> {
        let value = self.rng.next_below(max_value.max(1)) == 0;
        self.steps.increment();
        Some(value)
    }

    fn get_next_integer_choice(&mut self, _current: &AsyncOperation, max_value: u32) -> Option<u32> {
        if max_value == 0 {
            return None;
        }
        let value = self.rng.next_below(max_value);
        self.steps.increment();
        Some(value)
    }

    fn notify_bug_found(&mut self) {}

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.schedule_length = self.schedule_length.max(self.steps.steps());
        self.steps.reset();
        self.priorities.clear();
        self.change_points.clear();

        let mut range: Vec<u64> = (0..self.schedule_length).collect();
        self.rng.shuffle(&mut range);
        self.change_points
            .extend(range.into_iter().take(self.max_change_points));
        true
    }

    fn scheduled_steps(&self) -> u64 {
        self.steps.steps()
    }

    fn max_steps(&self) -> u64 {
        self.steps.max_steps()
    }

    fn is_fair(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        let points = self
            .change_points
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "PCT[priority change points '{}' [{points}], seed '{}']",
            self.max_change_points,
            self.rng.seed()
        )
    }
}
