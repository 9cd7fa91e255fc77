//! Uniform random walk.

use super::exploration::{self, ExecutionPath, StateCoverage, StepCounter};
use super::SchedulingStrategy;
use crate::runtime::{AbstractionLevel, AsyncOperation, OperationId};
use crate::util::DetRng;

/// Picks uniformly among the enabled operations at every step.
///
/// Besides deciding, the strategy records the visited states and the path
/// of the iteration; the learning strategies build on top of it.
#[derive(Debug, Clone)]
pub struct RandomStrategy {
    rng: DetRng,
    steps: StepCounter,
    coverage: StateCoverage,
    path: ExecutionPath,
    level: AbstractionLevel,
    bug_found: bool,
}

impl RandomStrategy {
    /// Creates a random strategy.
    #[must_use]
    pub fn new(seed: u64, max_steps: u64) -> Self {
        Self::with_level(seed, max_steps, AbstractionLevel::Default)
    }

    pub(crate) fn with_level(seed: u64, max_steps: u64, level: AbstractionLevel) -> Self {
        Self {
            rng: DetRng::new(seed),
            steps: StepCounter::new(max_steps),
            coverage: StateCoverage::default(),
            path: ExecutionPath::default(),
            level,
            bug_found: false,
        }
    }

    /// Distinct states visited across all iterations at `level`.
    #[must_use]
    pub fn distinct_states(&self, level: AbstractionLevel) -> usize {
        self.coverage.distinct_states(level)
    }

    /// Records the decision point for `current` and returns its state digest.
    pub(crate) fn capture(&mut self, current: &AsyncOperation) -> u64 {
        self.coverage.capture(current);
        let state = current.hashed_state(self.level);
        self.path.record(state, current.pending_type());
        state
    }

    /// Records the action taken at the latest decision point and counts it.
    pub(crate) fn commit(&mut self, action: u64) {
        self.path.take_action(action);
        self.steps.increment();
    }

    pub(crate) fn rng(&mut self) -> &mut DetRng {
        &mut self.rng
    }

    pub(crate) const fn path(&self) -> &ExecutionPath {
        &self.path
    }

    pub(crate) const fn bug_found(&self) -> bool {
        self.bug_found
    }

    pub(crate) const fn seed(&self) -> u64 {
        self.rng.seed()
    }
}

impl SchedulingStrategy for RandomStrategy {
    fn get_next(&mut self, current: &AsyncOperation, ops: &[&AsyncOperation]) -> Option<OperationId> {
        let enabled = exploration::enabled(ops);
        if enabled.is_empty() {
            return None;
        }
        self.capture(current);
        let next = enabled[self.rng.next_usize(enabled.len())].id();
        self.commit(next.as_u64());
        Some(next)
    }

    fn get_next_boolean_choice(&mut self, current: &AsyncOperation, max_value: u32) -> Option<bool> {
        self.capture(current);
        let value = self.rng.next_below(max_value.max(1)) == 0;
        self.commit(exploration::boolean_action(value));
        Some(value)
    }

    fn get_next_integer_choice(&mut self, current: &AsyncOperation, max_value: u32) -> Option<u32> {
        if max_value == 0 {
            return None;
        }
        self.capture(current);
        let value = self.rng.next_below(max_value);
        self.commit(exploration::integer_action(value));
        Some(value)
    }

    fn notify_bug_found(&mut self) {
        self.bug_found = true;
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.path.clear();
        self.steps.reset();
        self.bug_found = false;
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
        format!("Random[seed '{}']", self.rng.seed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::OperationStatus;
    use crate::strategy::test_support::{operations, refs, with_state, with_status};

    #[test]
    fn only_enabled_operations_are_picked() {
        let mut random = RandomStrategy::new(7, 0);
        let mut ops = operations(3);
        ops[1] = with_status(ops[1].clone(), OperationStatus::BlockedOnWaitAll);
        let refs = refs(&ops);
        for _ in 0..200 {
            let next = random.get_next(&ops[0], &refs).unwrap();
            assert_ne!(next, OperationId::new(1));
        }
        assert_eq!(random.scheduled_steps(), 200);
    }

    #[test]
    fn every_enabled_operation_is_eventually_picked() {
        let mut random = RandomStrategy::new(11, 0);
        let ops = operations(4);
        let refs = refs(&ops);
        let mut seen = [false; 4];
        for _ in 0..500 {
            let next = random.get_next(&ops[0], &refs).unwrap();
            seen[usize::try_from(next.as_u64()).unwrap()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn same_seed_same_decisions() {
        let ops = operations(5);
        let refs = refs(&ops);
        let run = |seed| {
            let mut random = RandomStrategy::new(seed, 0);
            (0..64)
                .map(|i| {
                    if i % 3 == 0 {
                        u64::from(random.get_next_boolean_choice(&ops[0], 2).unwrap())
                    } else {
                        random.get_next(&ops[0], &refs).unwrap().as_u64()
                    }
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(5), run(5));
        assert_ne!(run(5), run(6));
    }

    #[test]
    fn boolean_bias_follows_max_value() {
        let mut random = RandomStrategy::new(3, 0);
        let ops = operations(1);
        let trues = (0..1000)
            .filter(|_| random.get_next_boolean_choice(&ops[0], 10).unwrap())
            .count();
        assert!(trues < 250, "expected roughly 10% true, got {trues}");
    }

    #[test]
    fn records_path_and_coverage() {
        let mut random = RandomStrategy::new(1, 0);
        let ops = vec![with_state(operations(1)[0].clone(), 77)];
        random.get_next(&ops[0], &refs(&ops)).unwrap();
        random.get_next_integer_choice(&ops[0], 4).unwrap();
        assert_eq!(random.path().len(), 2);
        assert_eq!(random.distinct_states(AbstractionLevel::Default), 1);

        random.notify_bug_found();
        assert!(random.bug_found());
        assert!(random.prepare_for_next_iteration());
        assert!(random.path().is_empty());
        assert!(!random.bug_found());
        assert_eq!(random.scheduled_steps(), 0);
    }

    #[test]
    fn description_names_seed() {
        assert_eq!(RandomStrategy::new(9, 0).description(), "Random[seed '9']");
    }
}
