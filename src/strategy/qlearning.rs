//! Reinforcement-learning exploration.
//!
//! The strategy learns a Q-value for every (state, action) pair it has
//! seen, where states are hashed program states and actions are operation
//! ids or choice sentinels. Every step costs a small negative reward scaled
//! by how often the resulting state has been visited, which pushes the walk
//! towards rarely-seen states. Values are updated backwards along the path
//! of each iteration:
//!
//! ```text
//! Q(s, a) = (1 - α) Q(s, a) + α (r + γ max_a' Q(s', a'))
//! ```
//!
//! Actions are drawn from the softmax distribution over `Q(s, ·)`.

use std::collections::BTreeMap;

use super::exploration::{self, FALSE_CHOICE, TRUE_CHOICE};
use super::random::RandomStrategy;
use super::SchedulingStrategy;
use crate::runtime::{AbstractionLevel, AsyncOperation, OperationId, OperationType};
use crate::util::DetHashMap;

/// Learning rate α.
pub const LEARNING_RATE: f64 = 0.3;
/// Discount factor γ.
pub const GAMMA: f64 = 0.7;
/// Reward of the transition into a buggy state.
pub const BUG_STATE_REWARD: f64 = -1000.0;
/// Base reward of a transition that injects a failure.
pub const FAILURE_INJECTION_REWARD: f64 = -1000.0;
/// Base reward of every other transition.
pub const BASIC_ACTION_REWARD: f64 = -1.0;
/// Lowest reward a single transition can earn. Frequency-scaled rewards
/// saturate here instead of growing without bound.
pub const REWARD_FLOOR: f64 = -1.0e6;

/// Q-learning over hashed program states.
#[derive(Debug, Clone)]
pub struct QLearningStrategy {
    base: RandomStrategy,
    q_table: DetHashMap<u64, BTreeMap<u64, f64>>,
    frequencies: DetHashMap<u64, u64>,
    epochs: u64,
    reset_on_bug: bool,
}

impl QLearningStrategy {
    /// Creates a Q-learning strategy keyed on `level` digests.
    #[must_use]
    pub fn new(seed: u64, max_steps: u64, level: AbstractionLevel) -> Self {
        Self {
            base: RandomStrategy::with_level(seed, max_steps, level),
            q_table: DetHashMap::default(),
            frequencies: DetHashMap::default(),
            epochs: 0,
            reset_on_bug: true,
        }
    }

    /// Controls whether the learned table is forgotten after a buggy iteration.
    #[must_use]
    pub const fn reset_on_bug(mut self, value: bool) -> Self {
        self.reset_on_bug = value;
        self
    }

    /// Completed learning epochs (iterations).
    #[must_use]
    pub const fn epochs(&self) -> u64 {
        self.epochs
    }

    /// Learned value of `action` in `state`, if any.
    #[must_use]
    pub fn q_value(&self, state: u64, action: u64) -> Option<f64> {
        self.q_table.get(&state)?.get(&action).copied()
    }

    fn visit(&mut self, current: &AsyncOperation, candidates: &[u64]) -> u64 {
        let state = self.base.capture(current);
        *self.frequencies.entry(state).or_default() += 1;
        let row = self.q_table.entry(state).or_default();
        for action in candidates {
            row.entry(*action).or_insert(0.0);
        }
        state
    }

    fn choose(&mut self, state: u64, candidates: &[u64]) -> u64 {
        let row = self.q_table.get(&state);
        let values: Vec<f64> = candidates
            .iter()
            .map(|action| row.and_then(|r| r.get(action).copied()).unwrap_or_default())
            .collect();

        // Shifting by the maximum keeps exp() away from underflow without
        // changing the distribution.
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = values.iter().map(|q| (q - max).exp()).collect();
        let total: f64 = weights.iter().sum();

        let mut cumulative = Vec::with_capacity(weights.len());
        let mut acc = 0.0;
        for weight in &weights {
            acc += weight / total;
            cumulative.push(acc);
        }

        let draw = self.base.rng().next_f64();
        let index = pick_bucket(&cumulative, draw);
        let action = candidates[index];
        self.base.commit(action);
        action
    }

    fn reward(&self, next_kind: OperationType, next_state: u64) -> f64 {
        let base = if next_kind == OperationType::InjectFailure {
            FAILURE_INJECTION_REWARD
        } else {
            BASIC_ACTION_REWARD
        };
        #[allow(clippy::cast_precision_loss)]
        let frequency = self.frequencies.get(&next_state).copied().unwrap_or_default() as f64;
        (base * frequency).max(REWARD_FLOOR)
    }

    fn learn(&mut self) {
        let path = self.base.path();
        let last = path.len().saturating_sub(1);
        let bug_found = self.base.bug_found();

        let updates: Vec<(u64, u64, f64, u64)> = path
            .transitions()
            .enumerate()
            .map(|(i, (state, action, next))| {
                let reward = if bug_found && i + 1 == last {
                    BUG_STATE_REWARD
                } else {
                    self.reward(next.kind, next.state)
                };
                (state, action, reward, next.state)
            })
            .collect();

        for (state, action, reward, next_state) in updates.into_iter().rev() {
            let max_next = self
                .q_table
                .get(&next_state)
                .and_then(|row| row.values().copied().reduce(f64::max))
                .unwrap_or_default();
            let q = self.q_table.entry(state).or_default().entry(action).or_insert(0.0);
            *q = (1.0 - LEARNING_RATE).mul_add(*q, LEARNING_RATE * GAMMA.mul_add(max_next, reward));
        }
    }
}

impl SchedulingStrategy for QLearningStrategy {
    fn get_next(&mut self, current: &AsyncOperation, ops: &[&AsyncOperation]) -> Option<OperationId> {
        let candidates: Vec<u64> = exploration::enabled(ops)
            .iter()
            .map(|op| op.id().as_u64())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let state = self.visit(current, &candidates);
        Some(OperationId::new(self.choose(state, &candidates)))
    }

    fn get_next_boolean_choice(&mut self, current: &AsyncOperation, _max_value: u32) -> Option<bool> {
        let candidates = [FALSE_CHOICE, TRUE_CHOICE];
        let state = self.visit(current, &candidates);
        Some(self.choose(state, &candidates) == TRUE_CHOICE)
    }

    fn get_next_integer_choice(&mut self, current: &AsyncOperation, max_value: u32) -> Option<u32> {
        if max_value == 0 {
            return None;
        }
        let candidates: Vec<u64> = (0..max_value).map(exploration::integer_action).collect();
        let state = self.visit(current, &candidates);
        Some(exploration::integer_value(self.choose(state, &candidates)))
    }

    fn notify_bug_found(&mut self) {
        self.base.notify_bug_found();
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.learn();
        self.epochs += 1;
        if self.base.bug_found() && self.reset_on_bug {
            tracing::debug!(epochs = self.epochs, "qlearning: bug found, forgetting learned values");
            self.q_table.clear();
            self.frequencies.clear();
        }
        self.base.prepare_for_next_iteration()
    }

    fn scheduled_steps(&self) -> u64 {
        self.base.scheduled_steps()
    }

    fn max_steps(&self) -> u64 {
        self.base.max_steps()
    }

    fn is_fair(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        format!("QLearning[seed '{}']", self.base.seed())
    }
}

/// First bucket whose cumulative probability is at least `draw`.
fn pick_bucket(cumulative: &[f64], draw: f64) -> usize {
    cumulative
        .partition_point(|p| *p < draw)
        .min(cumulative.len().saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{operations, refs, with_state};

    fn at_state(state: u64) -> Vec<crate::runtime::AsyncOperation> {
        operations(2).into_iter().map(|op| with_state(op, state)).collect()
    }

    #[test]
    fn picks_enabled_operations() {
        let mut q = QLearningStrategy::new(1, 0, AbstractionLevel::Default);
        let ops = at_state(5);
        for _ in 0..50 {
            let next = q.get_next(&ops[0], &refs(&ops)).unwrap();
            assert!(next.as_u64() < 2);
        }
        assert_eq!(q.scheduled_steps(), 50);
    }

    #[test]
    fn learning_penalizes_visited_transitions() {
        let mut q = QLearningStrategy::new(3, 0, AbstractionLevel::Default);
        let a = at_state(1);
        let b = at_state(2);
        let action = q.get_next(&a[0], &refs(&a)).unwrap().as_u64();
        q.get_next(&b[0], &refs(&b)).unwrap();
        assert!(q.prepare_for_next_iteration());

        let value = q.q_value(1, action).unwrap();
        // freq(state 2) = 1, so r = -1 and Q = 0.3 * -1.
        assert!((value - (-0.3)).abs() < 1e-9, "got {value}");
        assert_eq!(q.epochs(), 1);
    }

    #[test]
    fn bug_transition_gets_bug_reward_and_resets() {
        let mut q = QLearningStrategy::new(3, 0, AbstractionLevel::Default).reset_on_bug(false);
        let a = at_state(1);
        let b = at_state(2);
        let action = q.get_next(&a[0], &refs(&a)).unwrap().as_u64();
        q.get_next(&b[0], &refs(&b)).unwrap();
        q.notify_bug_found();
        assert!(q.prepare_for_next_iteration());
        let value = q.q_value(1, action).unwrap();
        assert!((value - 0.3 * BUG_STATE_REWARD).abs() < 1e-9, "got {value}");

        let mut reset = QLearningStrategy::new(3, 0, AbstractionLevel::Default);
        reset.get_next(&a[0], &refs(&a)).unwrap();
        reset.get_next(&b[0], &refs(&b)).unwrap();
        reset.notify_bug_found();
        assert!(reset.prepare_for_next_iteration());
        assert_eq!(reset.q_value(1, action), None);
    }

    #[test]
    fn draw_on_a_boundary_picks_the_lower_bucket() {
        let cumulative = [0.25, 0.5, 1.0];
        assert_eq!(pick_bucket(&cumulative, 0.0), 0);
        assert_eq!(pick_bucket(&cumulative, 0.25), 0);
        assert_eq!(pick_bucket(&cumulative, 0.3), 1);
        assert_eq!(pick_bucket(&cumulative, 0.5), 1);
        assert_eq!(pick_bucket(&cumulative, 0.99), 2);
        // Rounding can leave the last sum just under the draw.
        assert_eq!(pick_bucket(&[0.5, 0.999_999], 0.999_999_9), 1);
    }

    #[test]
    fn softmax_favours_higher_values() {
        let mut q = QLearningStrategy::new(8, 0, AbstractionLevel::Default);
        let ops = at_state(9);
        q.q_table
            .insert(9, BTreeMap::from([(0, 0.0), (1, -50.0)]));
        let zeros = (0..200)
            .filter(|_| q.get_next(&ops[0], &refs(&ops)).unwrap().as_u64() == 0)
            .count();
        assert_eq!(zeros, 200);
    }

    #[test]
    fn very_negative_values_stay_well_defined() {
        let mut q = QLearningStrategy::new(8, 0, AbstractionLevel::Default);
        let ops = at_state(4);
        q.q_table
            .insert(4, BTreeMap::from([(0, -1.0e9), (1, -1.0e9)]));
        let mut seen = [false; 2];
        for _ in 0..200 {
            let next = q.get_next(&ops[0], &refs(&ops)).unwrap().as_u64();
            seen[usize::try_from(next).unwrap()] = true;
        }
        assert!(seen[0] && seen[1]);
    }

    #[test]
    fn reward_saturates() {
        let mut q = QLearningStrategy::new(1, 0, AbstractionLevel::Default);
        q.frequencies.insert(7, u64::MAX);
        assert_eq!(q.reward(OperationType::InjectFailure, 7), REWARD_FLOOR);
        assert_eq!(q.reward(OperationType::Yield, 8), 0.0);
    }

    #[test]
    fn boolean_and_integer_choices() {
        let mut q = QLearningStrategy::new(2, 0, AbstractionLevel::Default);
        let ops = at_state(3);
        q.get_next_boolean_choice(&ops[0], 2).unwrap();
        assert!(q.get_next_integer_choice(&ops[0], 3).unwrap() < 3);
        assert!(q.q_value(3, TRUE_CHOICE).is_some());
        assert!(q.q_value(3, exploration::integer_action(2)).is_some());
        assert_eq!(q.description(), "QLearning[seed '2']");
    }
}
