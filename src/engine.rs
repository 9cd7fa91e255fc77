//! The testing engine: runs a program under a strategy for many iterations.
//!
//! Each iteration gets a fresh [`OperationScheduler`]; the strategy outlives
//! iterations so it can carry exploration state (the DFS stack, PCT schedule
//! length, the Q-table) from one to the next.
//!
//! # Example
//!
//! ```ignore
//! use stepwise::{StrategyKind, TestConfig, TestingEngine};
//!
//! let config = TestConfig::new(7).strategy(StrategyKind::Pct).iterations(500);
//! let mut engine = TestingEngine::new(config)?;
//! let report = engine.run(|rt| {
//!     let task = rt.spawn("worker", |rt| rt.yield_now())?;
//!     rt.join(task)
//! });
//! assert!(!report.has_bugs());
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::TestConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::runtime::{
    BugReport, ControlledRuntime, OperationScheduler, OperationStateHasher, SchedulerOptions,
    StateHasher, TestReport,
};
use crate::strategy::{ReplayStrategy, SchedulingStrategy, Strategy};
use crate::trace::ScheduleTrace;

/// Name of the operation running the program under test.
pub const ROOT_OPERATION: &str = "main";

/// Outcome of one iteration.
#[derive(Debug, Clone)]
pub struct IterationResult {
    /// Zero-based iteration index.
    pub iteration: u64,
    /// Decisions taken by the strategy.
    pub steps: u64,
    /// The bug found, if any.
    pub bug: Option<BugReport>,
    /// Decisions recorded during the iteration.
    pub trace: ScheduleTrace,
    /// The schedule ran to its end without a bug.
    pub fully_explored: bool,
    /// The step bound ended the iteration.
    pub hit_bound: bool,
    /// Statistics of this iteration.
    pub report: TestReport,
}

/// Outcome of a testing campaign.
#[derive(Debug, Clone, Default)]
pub struct ExplorationReport {
    /// Statistics merged over every iteration.
    pub report: TestReport,
    /// Per-iteration results, in order.
    pub runs: Vec<IterationResult>,
    /// The strategy had nothing left to explore.
    pub exhausted: bool,
    /// Description of the strategy after the last iteration.
    pub strategy: String,
}

impl ExplorationReport {
    /// Returns true if any iteration found a bug.
    #[must_use]
    pub fn has_bugs(&self) -> bool {
        self.report.num_of_found_bugs > 0
    }

    /// Returns the first iteration that found a bug.
    #[must_use]
    pub fn first_bug(&self) -> Option<&IterationResult> {
        self.runs.iter().find(|run| run.bug.is_some())
    }

    /// Returns the trace of the first buggy iteration.
    #[must_use]
    pub fn bug_trace(&self) -> Option<&ScheduleTrace> {
        self.first_bug().map(|run| &run.trace)
    }

    /// Returns the number of iterations run.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.runs.len()
    }
}

/// Outcome of replaying a recorded trace.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    /// The replayed iteration.
    pub result: IterationResult,
    /// Where replay left the recorded schedule, if it did.
    pub divergence: Option<Error>,
    /// The replay took exactly the recorded decisions.
    pub reproduced: bool,
}

/// Runs programs under a scheduling strategy.
pub struct TestingEngine {
    config: TestConfig,
    strategy: Arc<Mutex<Strategy>>,
    hasher: Arc<dyn StateHasher>,
}

impl std::fmt::Debug for TestingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestingEngine")
            .field("config", &self.config)
            .field("strategy", &self.strategy.lock().description())
            .finish_non_exhaustive()
    }
}

impl TestingEngine {
    /// Creates an engine running the strategy named by `config`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(config: TestConfig) -> Result<Self> {
        config.validate()?;
        let strategy = Strategy::from_config(&config);
        Ok(Self {
            config,
            strategy: Arc::new(Mutex::new(strategy)),
            hasher: Arc::new(OperationStateHasher),
        })
    }

    /// Replaces the strategy built from the configuration.
    #[must_use]
    pub fn with_strategy(self, strategy: Strategy) -> Self {
        *self.strategy.lock() = strategy;
        self
    }

    /// Replaces the state hasher.
    #[must_use]
    pub fn with_state_hasher(mut self, hasher: Arc<dyn StateHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Returns the current strategy description.
    #[must_use]
    pub fn strategy_description(&self) -> String {
        self.strategy.lock().description()
    }

    /// Runs `test` for up to `iterations` iterations.
    ///
    /// The campaign ends early when the strategy is exhausted, or at the
    /// first bug if `stop_on_first_bug` is set.
    pub fn run<F>(&mut self, test: F) -> ExplorationReport
    where
        F: Fn(&ControlledRuntime) -> Result<()> + Send + Sync + 'static,
    {
        let test = Arc::new(test);
        let mut exploration = ExplorationReport::default();

        tracing::info!(
            strategy = %self.strategy_description(),
            iterations = self.config.iterations,
            seed = self.config.seed,
            "starting exploration"
        );

        for iteration in 0..self.config.iterations {
            if iteration > 0 && !self.strategy.lock().prepare_for_next_iteration() {
                tracing::info!(iteration, "strategy exhausted");
                exploration.exhausted = true;
                break;
            }

            let result = self.run_iteration(iteration, &test);
            exploration.report.merge(&result.report);
            let found_bug = result.bug.is_some();
            exploration.runs.push(result);
            if found_bug && self.config.stop_on_first_bug {
                break;
            }
        }

        exploration.strategy = self.strategy_description();
        tracing::info!(
            iterations = exploration.runs.len(),
            bugs = exploration.report.num_of_found_bugs,
            exhausted = exploration.exhausted,
            "exploration finished"
        );
        exploration
    }

    /// Runs a single iteration with the current strategy state.
    pub fn run_iteration<F>(&mut self, iteration: u64, test: &Arc<F>) -> IterationResult
    where
        F: Fn(&ControlledRuntime) -> Result<()> + Send + Sync + 'static,
    {
        let options = SchedulerOptions {
            consider_depth_bound_hit_as_bug: self.config.consider_depth_bound_hit_as_bug,
            max_unfair_steps: self.config.max_unfair_steps,
            seed: self.config.seed,
            iteration,
        };
        let scheduler = Arc::new(OperationScheduler::new(
            options,
            Arc::clone(&self.strategy),
            Arc::clone(&self.hasher),
        ));
        let runtime = ControlledRuntime::new(Arc::clone(&scheduler));

        let test = Arc::clone(test);
        if let Err(err) = runtime.start_operation(ROOT_OPERATION, move |rt| test(&rt)) {
            if !err.is_canceled() {
                tracing::warn!(%err, iteration, "failed to start root operation");
                scheduler.stop();
            }
        }

        scheduler.wait_until_stopped();
        scheduler.join_threads();

        let report = scheduler.get_report();
        let result = IterationResult {
            iteration,
            steps: report.scheduled_steps,
            bug: scheduler.bug(),
            trace: scheduler.take_trace(),
            fully_explored: scheduler.has_fully_explored(),
            hit_bound: scheduler.hit_step_bound(),
            report,
        };
        tracing::info!(
            iteration,
            steps = result.steps,
            bug = result.bug.is_some(),
            hit_bound = result.hit_bound,
            "iteration finished"
        );
        result
    }

    /// Replays `trace` against `test` once.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn replay<F>(config: &TestConfig, trace: &ScheduleTrace, test: F) -> Result<ReplayReport>
    where
        F: Fn(&ControlledRuntime) -> Result<()> + Send + Sync + 'static,
    {
        let mut config = config
            .clone()
            .iterations(1)
            .depth_bound_as_bug(trace.metadata.bound_is_bug);
        config.seed = trace.metadata.seed;
        let mut engine = Self::new(config)?
            .with_strategy(Strategy::Replay(ReplayStrategy::new(trace.clone())));

        let result = engine.run_iteration(trace.metadata.iteration, &Arc::new(test));
        let divergence = engine
            .strategy
            .lock()
            .divergence()
            .map(|message| Error::new(ErrorKind::TraceDivergence).with_message(message));
        let reproduced = divergence.is_none() && result.trace.same_decisions(trace);
        if !reproduced {
            tracing::warn!(
                recorded = trace.len(),
                replayed = result.trace.len(),
                "replay did not reproduce the recorded schedule"
            );
        }

        Ok(ReplayReport {
            result,
            divergence,
            reproduced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyKind;
    use crate::test_utils::init_test_logging;

    #[test]
    fn rejects_invalid_config() {
        let err = TestingEngine::new(TestConfig::new(1).iterations(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn single_operation_program_completes() {
        init_test_logging();
        let mut engine = TestingEngine::new(TestConfig::new(1).iterations(3)).unwrap();
        let report = engine.run(|rt| rt.yield_now());
        assert!(!report.has_bugs());
        assert_eq!(report.iterations(), 3);
        assert!(report.runs.iter().all(|run| run.fully_explored));
    }

    #[test]
    fn program_changing_under_dfs_is_not_explored() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        init_test_logging();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&runs);
        let config = TestConfig::new(1).strategy(StrategyKind::Dfs).iterations(10);
        let mut engine = TestingEngine::new(config).unwrap();
        let report = engine.run(move |rt| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                rt.random_bool().map(drop)
            } else {
                rt.spawn("late", |rt| rt.yield_now()).map(drop)
            }
        });

        assert_eq!(report.iterations(), 2);
        assert!(report.runs[0].fully_explored);
        assert!(!report.runs[1].fully_explored);
        assert!(!report.has_bugs());
        assert!(report.exhausted);
    }

    #[test]
    fn failing_assertion_is_reported() {
        init_test_logging();
        let mut engine = TestingEngine::new(TestConfig::new(1).iterations(5)).unwrap();
        let report = engine.run(|rt| rt.assert(false, "always fails"));
        assert!(report.has_bugs());
        assert_eq!(report.iterations(), 1);
        let bug = report.first_bug().unwrap().bug.clone().unwrap();
        assert_eq!(bug.kind, ErrorKind::AssertionFailure);
        assert_eq!(bug.message, "always fails");
    }

    #[test]
    fn panicking_operation_is_reported() {
        init_test_logging();
        let mut engine = TestingEngine::new(TestConfig::new(1).iterations(1)).unwrap();
        let report = engine.run(|rt| {
            let task = rt.spawn("boom", |_rt| -> Result<()> { panic!("kaboom") })?;
            rt.join(task)
        });
        let bug = report.first_bug().unwrap().bug.clone().unwrap();
        assert!(bug.message.contains("'boom' panicked: kaboom"), "{}", bug.message);
    }

    #[test]
    fn user_error_is_reported_as_unhandled_failure() {
        init_test_logging();
        let mut engine = TestingEngine::new(TestConfig::new(1).iterations(1)).unwrap();
        let report = engine.run(|_rt| Err(Error::user("gave up")));
        let bug = report.first_bug().unwrap().bug.clone().unwrap();
        assert!(bug.message.starts_with("Unhandled failure in operation 'main'"));
    }

    #[test]
    fn dfs_exhausts_a_two_way_choice() {
        init_test_logging();
        let config = TestConfig::new(1).strategy(StrategyKind::Dfs).iterations(10);
        let mut engine = TestingEngine::new(config).unwrap();
        let report = engine.run(|rt| rt.random_bool().map(|_| ()));
        assert!(report.exhausted);
        assert_eq!(report.iterations(), 2);
    }
}
