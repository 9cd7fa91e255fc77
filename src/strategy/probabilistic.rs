//! Coin-flip random walk.
//!
//! Keeps the current operation running for as long as it is enabled, and
//! only switches when `coin_flips` consecutive fair coin flips all come up
//! heads. Long uninterrupted runs are likely; preemptions are rare but
//! never impossible.

use super::exploration::{self, StepCounter};
use super::SchedulingStrategy;
use crate::runtime::{AsyncOperation, OperationId};
use crate::util::DetRng;

/// Random walk that switches operations with probability `2^-coin_flips`.
#[derive(Debug, Clone)]
pub struct ProbabilisticRandomStrategy {
    rng: DetRng,
    steps: StepCounter,
    coin_flips: usize,
}

impl ProbabilisticRandomStrategy {
    /// Creates the strategy.
    #[must_use]
    pub const fn new(seed: u64, max_steps: u64, coin_flips: usize) -> Self {
        Self {
            rng: DetRng::new(seed),
            steps: StepCounter::new(max_steps),
            coin_flips,
        }
    }

    fn should_switch(&mut self) -> bool {
        (0..self.coin_flips).all(|_| self.rng.next_bool())
    }
}

impl SchedulingStrategy for ProbabilisticRandomStrategy {
    fn get_next(&mut self, current: &AsyncOperation, ops: &[&AsyncOperation]) -> Option<OperationId> {
        let enabled = exploration::enabled(ops);
        if enabled.is_empty() {
            return None;
        }
        self.steps.increment();
        if current.is_enabled() && !self.should_switch() {
            return Some(current.id());
        }
        Some(enabled[self.rng.next_usize(enabled.len())].id())
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
        self.steps.reset();
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
        format!(
            "ProbabilisticRandom[coin flips '{}', seed '{}']",
            self.coin_flips,
            self.rng.seed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::OperationStatus;
    use crate::strategy::test_support::{operations, refs, with_status};

    #[test]
    fn mostly_keeps_current_operation() {
        let mut strategy = ProbabilisticRandomStrategy::new(6, 0, 5);
        let ops = operations(3);
        let kept = (0..1000)
            .filter(|_| strategy.get_next(&ops[1], &refs(&ops)) == Some(OperationId::new(1)))
            .count();
        assert!(kept > 900, "kept {kept}");
        assert!(kept < 1000);
    }

    #[test]
    fn switches_when_current_is_blocked() {
        let mut strategy = ProbabilisticRandomStrategy::new(6, 0, 5);
        let mut ops = operations(2);
        ops[0] = with_status(ops[0].clone(), OperationStatus::BlockedOnReceive);
        for _ in 0..20 {
            assert_eq!(strategy.get_next(&ops[0], &refs(&ops)), Some(OperationId::new(1)));
        }
    }

    #[test]
    fn zero_flips_behaves_like_random() {
        let mut strategy = ProbabilisticRandomStrategy::new(2, 0, 0);
        let ops = operations(2);
        let others = (0..200)
            .filter(|_| strategy.get_next(&ops[0], &refs(&ops)) == Some(OperationId::new(1)))
            .count();
        assert!(others > 50, "switched {others}");
    }
}
