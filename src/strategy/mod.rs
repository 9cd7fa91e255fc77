//! Exploration strategies.
//!
//! At every scheduling point the [`OperationScheduler`] asks its strategy
//! which operation runs next, and at every nondeterministic choice which
//! value to return. Between iterations the strategy is told to prepare the
//! next schedule; returning `false` there ends the campaign.
//!
//! | Strategy | Fair | Idea |
//! |----------|------|------|
//! | [`DfsStrategy`] | no | enumerate every schedule depth-first |
//! | [`RandomStrategy`] | yes | uniform random walk |
//! | [`GreedyRandomStrategy`] | yes | prefer untried, then rarely-seen transitions |
//! | [`PctStrategy`] | yes | priorities with `k` random change points |
//! | [`QLearningStrategy`] | yes | softmax over learned Q-values |
//! | [`ProbabilisticRandomStrategy`] | yes | switch only on a run of coin flips |
//! | [`DelayBoundingStrategy`] | no | round-robin with `k` random delays |
//! | [`ComboStrategy`] | suffix | prefix strategy, then suffix strategy |
//! | [`ReplayStrategy`] | no | follow a recorded trace |
//!
//! [`OperationScheduler`]: crate::runtime::OperationScheduler

pub mod combo;
pub mod delay_bounding;
pub mod dfs;
pub mod exploration;
pub mod greedy;
pub mod pct;
pub mod probabilistic;
pub mod qlearning;
pub mod random;
pub mod replay;

pub use combo::ComboStrategy;
pub use delay_bounding::DelayBoundingStrategy;
pub use dfs::DfsStrategy;
pub use greedy::GreedyRandomStrategy;
pub use pct::PctStrategy;
pub use probabilistic::ProbabilisticRandomStrategy;
pub use qlearning::QLearningStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;

use crate::config::{StrategyKind, TestConfig};
use crate::runtime::{AsyncOperation, OperationId};

/// Decides schedules and nondeterministic choices.
///
/// `ops` always holds every registered operation ordered by id; strategies
/// pick among the enabled ones. Returning `None` from any `get_*` method
/// means the strategy has nothing more to offer for this iteration.
pub trait SchedulingStrategy: Send {
    /// Picks the next operation to run.
    fn get_next(&mut self, current: &AsyncOperation, ops: &[&AsyncOperation])
        -> Option<OperationId>;

    /// Resolves a boolean choice. `max_value` biases random strategies:
    /// `true` is returned with probability `1 / max_value`.
    fn get_next_boolean_choice(&mut self, current: &AsyncOperation, max_value: u32)
        -> Option<bool>;

    /// Resolves an integer choice in `[0, max_value)`.
    fn get_next_integer_choice(&mut self, current: &AsyncOperation, max_value: u32)
        -> Option<u32>;

    /// Tells the strategy the current iteration found a bug.
    fn notify_bug_found(&mut self);

    /// Prepares the next iteration. `false` means there is nothing left to explore.
    fn prepare_for_next_iteration(&mut self) -> bool;

    /// Decisions taken in the current iteration.
    fn scheduled_steps(&self) -> u64;

    /// The step bound (0 = unbounded).
    fn max_steps(&self) -> u64;

    /// True once the step bound is reached.
    fn has_reached_max_steps(&self) -> bool {
        let max = self.max_steps();
        max != 0 && self.scheduled_steps() >= max
    }

    /// Why the strategy could not follow its planned schedule in this
    /// iteration, if it could not. A `None` decision after a divergence
    /// does not mean the schedule was explored.
    fn divergence(&self) -> Option<&str> {
        None
    }

    /// True if the strategy eventually schedules every enabled operation.
    fn is_fair(&self) -> bool;

    /// Human-readable description, including parameters and seed.
    fn description(&self) -> String;
}

/// The closed set of strategies the engine can run.
#[derive(Debug)]
pub enum Strategy {
    /// Depth-first enumeration.
    Dfs(DfsStrategy),
    /// Uniform random walk.
    Random(RandomStrategy),
    /// Greedy random walk.
    GreedyRandom(GreedyRandomStrategy),
    /// Probabilistic concurrency testing.
    Pct(PctStrategy),
    /// Q-learning.
    QLearning(QLearningStrategy),
    /// Coin-flip random walk.
    Probabilistic(ProbabilisticRandomStrategy),
    /// Delay bounding.
    DelayBounding(DelayBoundingStrategy),
    /// Prefix strategy followed by a suffix strategy.
    Combo(ComboStrategy),
    /// Trace replay.
    Replay(ReplayStrategy),
}

macro_rules! dispatch {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            Strategy::Dfs($s) => $body,
            Strategy::Random($s) => $body,
            Strategy::GreedyRandom($s) => $body,
            Strategy::Pct($s) => $body,
            Strategy::QLearning($s) => $body,
            Strategy::Probabilistic($s) => $body,
            Strategy::DelayBounding($s) => $body,
            Strategy::Combo($s) => $body,
            Strategy::Replay($s) => $body,
        }
    };
}

impl Strategy {
    /// Builds the strategy named by `config`, bounded by the step bound that
    /// matches its fairness.
    #[must_use]
    pub fn from_config(config: &TestConfig) -> Self {
        let fair = config.step_bound(true);
        let unfair = config.step_bound(false);
        match config.strategy {
            StrategyKind::Dfs => Self::Dfs(DfsStrategy::new(unfair)),
            StrategyKind::Random => Self::Random(RandomStrategy::new(config.seed, fair)),
            StrategyKind::GreedyRandom => Self::GreedyRandom(GreedyRandomStrategy::new(
                config.seed,
                fair,
                config.abstraction_level,
            )),
            StrategyKind::Pct => {
                Self::Pct(PctStrategy::new(config.seed, fair, config.strategy_bound))
            }
            StrategyKind::QLearning => Self::QLearning(
                QLearningStrategy::new(config.seed, fair, config.abstraction_level)
                    .reset_on_bug(config.qlearning_reset_on_bug),
            ),
            StrategyKind::Probabilistic => Self::Probabilistic(
                ProbabilisticRandomStrategy::new(config.seed, fair, config.strategy_bound),
            ),
            StrategyKind::DelayBounding => Self::DelayBounding(DelayBoundingStrategy::new(
                config.seed,
                unfair,
                config.strategy_bound,
            )),
        }
    }

    /// Combines `prefix` and `suffix` into a [`ComboStrategy`].
    #[must_use]
    pub fn combo(prefix: Self, suffix: Self) -> Self {
        Self::Combo(ComboStrategy::new(prefix, suffix))
    }
}

impl SchedulingStrategy for Strategy {
    fn get_next(
        &mut self,
        current: &AsyncOperation,
        ops: &[&AsyncOperation],
    ) -> Option<OperationId> {
        dispatch!(self, s => s.get_next(current, ops))
    }

    fn get_next_boolean_choice(&mut self, current: &AsyncOperation, max_value: u32) -> Option<bool> {
        dispatch!(self, s => s.get_next_boolean_choice(current, max_value))
    }

    fn get_next_integer_choice(&mut self, current: &AsyncOperation, max_value: u32) -> Option<u32> {
        dispatch!(self, s => s.get_next_integer_choice(current, max_value))
    }

    fn notify_bug_found(&mut self) {
        dispatch!(self, s => s.notify_bug_found());
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        dispatch!(self, s => s.prepare_for_next_iteration())
    }

    fn scheduled_steps(&self) -> u64 {
        dispatch!(self, s => s.scheduled_steps())
    }

    fn max_steps(&self) -> u64 {
        dispatch!(self, s => s.max_steps())
    }

    fn has_reached_max_steps(&self) -> bool {
        dispatch!(self, s => s.has_reached_max_steps())
    }

    fn divergence(&self) -> Option<&str> {
        dispatch!(self, s => s.divergence())
    }

    fn is_fair(&self) -> bool {
        dispatch!(self, s => s.is_fair())
    }

    fn description(&self) -> String {
        dispatch!(self, s => s.description())
    }
}
