//! Greedy random walk over hashed program states.
//!
//! For every visited state the strategy remembers, per action (operation id
//! or choice sentinel), which state that action led to. At a decision point
//! it first tries actions it has never taken from this state. Once every
//! action has been tried, it takes the one whose resulting state has been
//! visited least often, breaking ties at random.

use std::collections::BTreeMap;

use super::exploration::{self, FALSE_CHOICE, TRUE_CHOICE};
use super::random::RandomStrategy;
use super::SchedulingStrategy;
use crate::runtime::{AbstractionLevel, AsyncOperation, OperationId};
use crate::util::DetHashMap;

/// Random walk biased towards untried and rarely-visited transitions.
#[derive(Debug, Clone)]
pub struct GreedyRandomStrategy {
    base: RandomStrategy,
    transitions: DetHashMap<u64, BTreeMap<u64, Option<u64>>>,
    frequencies: DetHashMap<u64, u64>,
}

impl GreedyRandomStrategy {
    /// Creates a greedy random strategy keyed on `level` digests.
    #[must_use]
    pub fn new(seed: u64, max_steps: u64, level: AbstractionLevel) -> Self {
        Self {
            base: RandomStrategy::with_level(seed, max_steps, level),
            transitions: DetHashMap::default(),
            frequencies: DetHashMap::default(),
        }
    }

    /// Number of states with a transition table.
    #[must_use]
    pub fn known_states(&self) -> usize {
        self.transitions.len()
    }

    fn visit(&mut self, current: &AsyncOperation, candidates: &[u64]) -> u64 {
        let state = self.base.capture(current);
        *self.frequencies.entry(state).or_default() += 1;
        let table = self.transitions.entry(state).or_default();
        for action in candidates {
            table.entry(*action).or_insert(None);
        }
        state
    }

    fn choose(&mut self, state: u64, candidates: &[u64]) -> u64 {
        let table = self.transitions.get(&state);
        let outcome = |action: &u64| table.and_then(|t| t.get(action).copied()).flatten();

        let untried: Vec<u64> = candidates
            .iter()
            .copied()
            .filter(|action| outcome(action).is_none())
            .collect();
        let pool = if untried.is_empty() {
            let frequency = |action: &u64| {
                outcome(action)
                    .and_then(|next| self.frequencies.get(&next).copied())
                    .unwrap_or_default()
            };
            let least = candidates.iter().map(frequency).min().unwrap_or_default();
            candidates
                .iter()
                .copied()
                .filter(|action| frequency(action) == least)
                .collect()
        } else {
            untried
        };

        let action = pool[self.base.rng().next_usize(pool.len())];
        self.base.commit(action);
        action
    }
}

impl SchedulingStrategy for GreedyRandomStrategy {
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
        for (state, action, next) in self.base.path().transitions() {
            self.transitions
                .entry(state)
                .or_default()
                .insert(action, Some(next.state));
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
        format!("GreedyRandom[seed '{}']", self.base.seed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{operations, refs, with_state};

    #[test]
    fn tries_every_action_before_repeating() {
        let mut greedy = GreedyRandomStrategy::new(5, 0, AbstractionLevel::Default);
        let ops: Vec<_> = operations(3).into_iter().map(|op| with_state(op, 1)).collect();
        let refs = refs(&ops);

        // Each iteration takes one decision from state 1 and then lands in a
        // distinct follow-up state, so untried actions stay untried until used.
        let mut picked = Vec::new();
        for round in 0..3u64 {
            picked.push(greedy.get_next(&ops[0], &refs).unwrap());
            let follow = vec![with_state(operations(1)[0].clone(), 100 + round)];
            greedy.get_next(&follow[0], &crate::strategy::test_support::refs(&follow));
            assert!(greedy.prepare_for_next_iteration());
        }
        picked.sort();
        picked.dedup();
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn prefers_least_visited_outcome() {
        let mut greedy = GreedyRandomStrategy::new(1, 0, AbstractionLevel::Default);
        let start = with_state(operations(1)[0].clone(), 1);
        let popular = with_state(operations(1)[0].clone(), 2);
        let rare = with_state(operations(1)[0].clone(), 3);

        greedy.transitions.insert(
            1,
            BTreeMap::from([(FALSE_CHOICE, Some(2)), (TRUE_CHOICE, Some(3))]),
        );
        for _ in 0..5 {
            greedy.visit(&popular, &[]);
        }
        greedy.visit(&rare, &[]);

        for _ in 0..20 {
            assert_eq!(greedy.get_next_boolean_choice(&start, 2), Some(true));
        }
    }

    #[test]
    fn prepare_records_transitions() {
        let mut greedy = GreedyRandomStrategy::new(2, 0, AbstractionLevel::Default);
        let a = vec![with_state(operations(1)[0].clone(), 10)];
        let b = vec![with_state(operations(1)[0].clone(), 20)];
        let next = greedy.get_next(&a[0], &refs(&a)).unwrap();
        greedy.get_next(&b[0], &refs(&b)).unwrap();
        assert!(greedy.prepare_for_next_iteration());
        assert_eq!(greedy.transitions[&10][&next.as_u64()], Some(20));
        assert_eq!(greedy.known_states(), 2);
    }

    #[test]
    fn integer_choices_in_range() {
        let mut greedy = GreedyRandomStrategy::new(4, 0, AbstractionLevel::Default);
        let ops = operations(1);
        for _ in 0..50 {
            assert!(greedy.get_next_integer_choice(&ops[0], 5).unwrap() < 5);
        }
        assert_eq!(greedy.get_next_integer_choice(&ops[0], 0), None);
    }
}
