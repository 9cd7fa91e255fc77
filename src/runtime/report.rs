//! Iteration and campaign summaries.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::operation::OperationId;
use crate::error::{Error, ErrorKind};

/// The first failure recorded in an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugReport {
    /// What kind of property was violated.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Operation that was running when the failure was recorded.
    pub operation: Option<OperationId>,
}

impl BugReport {
    /// Converts the report into the error controlled code receives.
    #[must_use]
    pub fn to_error(&self) -> Error {
        let error = Error::new(self.kind).with_message(self.message.clone());
        match self.operation {
            Some(op) => error.with_operation(op),
            None => error,
        }
    }
}

/// Step and bug statistics for one iteration, or merged over a campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// Number of iterations that found a bug.
    pub num_of_found_bugs: u64,
    /// Distinct bug messages, ordered.
    pub bug_reports: BTreeSet<String>,
    /// Iterations run under a fair strategy.
    pub num_of_explored_fair_schedules: u64,
    /// Iterations run under an unfair strategy.
    pub num_of_explored_unfair_schedules: u64,
    /// Sum of the steps of all fair iterations.
    pub total_explored_fair_steps: u64,
    /// Fewest steps of a fair iteration.
    pub min_explored_fair_steps: Option<u64>,
    /// Most steps of a fair iteration.
    pub max_explored_fair_steps: u64,
    /// Most steps of an unfair iteration.
    pub max_explored_unfair_steps: u64,
    /// Fair iterations that hit the fair step bound.
    pub max_fair_steps_hit_in_fair_tests: u64,
    /// Fair iterations that ran past the unfair step bound.
    pub max_unfair_steps_hit_in_fair_tests: u64,
    /// Unfair iterations that hit the unfair step bound.
    pub max_unfair_steps_hit_in_unfair_tests: u64,
    /// Largest number of steps of any single iteration.
    pub scheduled_steps: u64,
}

/// Inputs of [`TestReport::for_iteration`].
#[derive(Debug, Clone, Copy)]
pub struct IterationStats<'a> {
    /// Whether the strategy is fair.
    pub fair: bool,
    /// Steps taken.
    pub steps: u64,
    /// Whether the strategy reached its step bound.
    pub hit_bound: bool,
    /// The unfair step bound (0 = unbounded).
    pub max_unfair_steps: u64,
    /// The bug, if one was found.
    pub bug: Option<&'a BugReport>,
}

impl TestReport {
    /// Summarizes a single iteration.
    #[must_use]
    pub fn for_iteration(stats: IterationStats<'_>) -> Self {
        let mut report = Self {
            scheduled_steps: stats.steps,
            ..Self::default()
        };
        if let Some(bug) = stats.bug {
            report.num_of_found_bugs = 1;
            report.bug_reports.insert(bug.message.clone());
        }

        if stats.fair {
            report.num_of_explored_fair_schedules = 1;
            report.total_explored_fair_steps = stats.steps;
            report.min_explored_fair_steps = Some(stats.steps);
            report.max_explored_fair_steps = stats.steps;
            if stats.hit_bound {
                report.max_fair_steps_hit_in_fair_tests = 1;
            }
            if stats.max_unfair_steps != 0 && stats.steps >= stats.max_unfair_steps {
                report.max_unfair_steps_hit_in_fair_tests = 1;
            }
        } else {
            report.num_of_explored_unfair_schedules = 1;
            report.max_explored_unfair_steps = stats.steps;
            if stats.hit_bound {
                report.max_unfair_steps_hit_in_unfair_tests = 1;
            }
        }
        report
    }

    /// Folds `other` into this report.
    pub fn merge(&mut self, other: &Self) {
        self.num_of_found_bugs += other.num_of_found_bugs;
        self.bug_reports.extend(other.bug_reports.iter().cloned());
        self.num_of_explored_fair_schedules += other.num_of_explored_fair_schedules;
        self.num_of_explored_unfair_schedules += other.num_of_explored_unfair_schedules;
        self.total_explored_fair_steps += other.total_explored_fair_steps;
        self.min_explored_fair_steps = match (self.min_explored_fair_steps, other.min_explored_fair_steps) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_explored_fair_steps = self.max_explored_fair_steps.max(other.max_explored_fair_steps);
        self.max_explored_unfair_steps = self
            .max_explored_unfair_steps
            .max(other.max_explored_unfair_steps);
        self.max_fair_steps_hit_in_fair_tests += other.max_fair_steps_hit_in_fair_tests;
        self.max_unfair_steps_hit_in_fair_tests += other.max_unfair_steps_hit_in_fair_tests;
        self.max_unfair_steps_hit_in_unfair_tests += other.max_unfair_steps_hit_in_unfair_tests;
        self.scheduled_steps = self.scheduled_steps.max(other.scheduled_steps);
    }

    /// Total iterations summarized.
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.num_of_explored_fair_schedules + self.num_of_explored_unfair_schedules
    }

    /// Mean steps of the fair iterations.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_fair_steps(&self) -> Option<f64> {
        (self.num_of_explored_fair_schedules > 0).then(|| {
            self.total_explored_fair_steps as f64 / self.num_of_explored_fair_schedules as f64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(fair: bool, steps: u64) -> IterationStats<'static> {
        IterationStats {
            fair,
            steps,
            hit_bound: false,
            max_unfair_steps: 100,
            bug: None,
        }
    }

    #[test]
    fn fair_iteration() {
        let report = TestReport::for_iteration(IterationStats {
            hit_bound: true,
            ..stats(true, 150)
        });
        assert_eq!(report.num_of_explored_fair_schedules, 1);
        assert_eq!(report.min_explored_fair_steps, Some(150));
        assert_eq!(report.max_fair_steps_hit_in_fair_tests, 1);
        assert_eq!(report.max_unfair_steps_hit_in_fair_tests, 1);
        assert_eq!(report.num_of_explored_unfair_schedules, 0);
    }

    #[test]
    fn unfair_iteration_with_bug() {
        let bug = BugReport {
            kind: ErrorKind::AssertionFailure,
            message: "boom".into(),
            operation: Some(OperationId::new(1)),
        };
        let report = TestReport::for_iteration(IterationStats {
            bug: Some(&bug),
            ..stats(false, 7)
        });
        assert_eq!(report.num_of_found_bugs, 1);
        assert!(report.bug_reports.contains("boom"));
        assert_eq!(report.max_explored_unfair_steps, 7);
        assert_eq!(report.min_explored_fair_steps, None);
        assert_eq!(bug.to_error().to_string(), "AssertionFailure [op#1]: boom");
    }

    #[test]
    fn merge_accumulates() {
        let mut total = TestReport::default();
        for steps in [10, 4, 30] {
            total.merge(&TestReport::for_iteration(stats(true, steps)));
        }
        total.merge(&TestReport::for_iteration(stats(false, 50)));
        assert_eq!(total.iterations(), 4);
        assert_eq!(total.total_explored_fair_steps, 44);
        assert_eq!(total.min_explored_fair_steps, Some(4));
        assert_eq!(total.max_explored_fair_steps, 30);
        assert_eq!(total.max_explored_unfair_steps, 50);
        assert_eq!(total.scheduled_steps, 50);
        let average = total.average_fair_steps().unwrap();
        assert!((average - 44.0 / 3.0).abs() < 1e-9);
    }
}
