//! Configuration for a testing campaign.
//!
//! [`TestConfig`] collects everything the engine needs to pick a strategy
//! and bound an iteration. Values can be set programmatically, through
//! `STEPWISE_*` environment variables (see [`env`]), or from a TOML file when
//! the `config-file` feature is enabled.
//!
//! # Example
//!
//! ```
//! use stepwise::config::{StrategyKind, TestConfig};
//!
//! let config = TestConfig::new(7)
//!     .strategy(StrategyKind::Pct)
//!     .strategy_bound(3)
//!     .iterations(500);
//! assert_eq!(config.seed, 7);
//! ```

pub mod env;

pub use env::{apply_env_overrides, from_env};
#[cfg(feature = "config-file")]
pub use env::{apply_toml_config, parse_toml_file, parse_toml_str, TestTomlConfig};

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::runtime::AbstractionLevel;
use crate::util::DetRng;

/// The exploration strategies a campaign can be configured with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Exhaustive depth-first enumeration of schedules.
    Dfs,
    /// Uniform random walk.
    #[default]
    Random,
    /// Random walk that prefers untried and rarely-seen transitions.
    GreedyRandom,
    /// Probabilistic concurrency testing with priority change points.
    Pct,
    /// Reinforcement learning over hashed program states.
    #[serde(rename = "qlearning")]
    QLearning,
    /// Keeps the current operation running unless a run of coin flips says switch.
    Probabilistic,
    /// Round-robin scheduling with a bounded number of random delays.
    DelayBounding,
}

impl StrategyKind {
    /// Every strategy kind, in display order.
    pub const ALL: [Self; 7] = [
        Self::Dfs,
        Self::Random,
        Self::GreedyRandom,
        Self::Pct,
        Self::QLearning,
        Self::Probabilistic,
        Self::DelayBounding,
    ];

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dfs => "dfs",
            Self::Random => "random",
            Self::GreedyRandom => "greedy-random",
            Self::Pct => "pct",
            Self::QLearning => "qlearning",
            Self::Probabilistic => "probabilistic",
            Self::DelayBounding => "delay-bounding",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dfs" => Ok(Self::Dfs),
            "random" => Ok(Self::Random),
            "greedy-random" | "greedy_random" | "greedy" => Ok(Self::GreedyRandom),
            "pct" => Ok(Self::Pct),
            "qlearning" | "q-learning" | "rl" => Ok(Self::QLearning),
            "probabilistic" | "probabilistic-random" => Ok(Self::Probabilistic),
            "delay-bounding" | "delay_bounding" => Ok(Self::DelayBounding),
            other => Err(Error::invalid_config(format!("unknown strategy '{other}'"))),
        }
    }
}

/// Configuration for a testing campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Seed for every random decision of the strategy.
    pub seed: u64,
    /// Maximum number of iterations to run.
    pub iterations: u64,
    /// Exploration strategy.
    pub strategy: StrategyKind,
    /// Step bound for unfair strategies (0 = unbounded).
    pub max_unfair_steps: u64,
    /// Step bound for fair strategies (0 = unbounded).
    pub max_fair_steps: u64,
    /// Report hitting the step bound as a bug instead of ending the iteration quietly.
    pub consider_depth_bound_hit_as_bug: bool,
    /// PCT change points, delay-bounding delays, or probabilistic coin flips.
    pub strategy_bound: usize,
    /// Granularity of the state digests the Q-learning strategy keys on.
    pub abstraction_level: AbstractionLevel,
    /// Forget the learned Q-table after an iteration that found a bug.
    pub qlearning_reset_on_bug: bool,
    /// Stop the campaign at the first iteration that finds a bug.
    pub stop_on_first_bug: bool,
}

impl TestConfig {
    /// Default step bound for unfair strategies.
    pub const DEFAULT_MAX_UNFAIR_STEPS: u64 = 10_000;
    /// Default step bound for fair strategies.
    pub const DEFAULT_MAX_FAIR_STEPS: u64 = 100_000;

    /// Creates a configuration with the given seed and default settings.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            iterations: 100,
            strategy: StrategyKind::Random,
            max_unfair_steps: Self::DEFAULT_MAX_UNFAIR_STEPS,
            max_fair_steps: Self::DEFAULT_MAX_FAIR_STEPS,
            consider_depth_bound_hit_as_bug: false,
            strategy_bound: 2,
            abstraction_level: AbstractionLevel::Default,
            qlearning_reset_on_bug: true,
            stop_on_first_bug: true,
        }
    }

    /// Sets the maximum number of iterations.
    #[must_use]
    pub const fn iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the exploration strategy.
    #[must_use]
    pub const fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets both step bounds to `steps`.
    #[must_use]
    pub const fn max_steps(mut self, steps: u64) -> Self {
        self.max_unfair_steps = steps;
        self.max_fair_steps = steps;
        self
    }

    /// Sets the step bound used by unfair strategies.
    #[must_use]
    pub const fn max_unfair_steps(mut self, steps: u64) -> Self {
        self.max_unfair_steps = steps;
        self
    }

    /// Sets the step bound used by fair strategies.
    #[must_use]
    pub const fn max_fair_steps(mut self, steps: u64) -> Self {
        self.max_fair_steps = steps;
        self
    }

    /// Removes both step bounds.
    #[must_use]
    pub const fn no_step_limit(mut self) -> Self {
        self.max_unfair_steps = 0;
        self.max_fair_steps = 0;
        self
    }

    /// Treats hitting the step bound as a bug.
    #[must_use]
    pub const fn depth_bound_as_bug(mut self, value: bool) -> Self {
        self.consider_depth_bound_hit_as_bug = value;
        self
    }

    /// Sets the strategy bound (PCT change points, delays, coin flips).
    #[must_use]
    pub const fn strategy_bound(mut self, bound: usize) -> Self {
        self.strategy_bound = bound;
        self
    }

    /// Sets the state abstraction used by Q-learning.
    #[must_use]
    pub const fn abstraction_level(mut self, level: AbstractionLevel) -> Self {
        self.abstraction_level = level;
        self
    }

    /// Controls whether Q-learning forgets its table after a bug.
    #[must_use]
    pub const fn qlearning_reset_on_bug(mut self, value: bool) -> Self {
        self.qlearning_reset_on_bug = value;
        self
    }

    /// Controls whether the campaign stops at the first bug.
    #[must_use]
    pub const fn stop_on_first_bug(mut self, value: bool) -> Self {
        self.stop_on_first_bug = value;
        self
    }

    /// Returns the step bound that applies to a strategy of the given fairness.
    #[must_use]
    pub const fn step_bound(&self, fair: bool) -> u64 {
        if fair {
            self.max_fair_steps
        } else {
            self.max_unfair_steps
        }
    }

    /// Creates the deterministic RNG for this configuration.
    #[must_use]
    pub const fn rng(&self) -> DetRng {
        DetRng::new(self.seed)
    }

    /// Checks the configuration for values no campaign can run with.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::invalid_config("iterations must be at least 1"));
        }
        Ok(())
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new(42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TestConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.strategy, StrategyKind::Random);
        assert_eq!(config.max_unfair_steps, 10_000);
        assert_eq!(config.max_fair_steps, 100_000);
        assert!(config.stop_on_first_bug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_chain() {
        let config = TestConfig::new(5)
            .strategy(StrategyKind::Dfs)
            .iterations(10)
            .max_steps(50)
            .strategy_bound(4)
            .depth_bound_as_bug(true);
        assert_eq!(config.iterations, 10);
        assert_eq!(config.step_bound(true), 50);
        assert_eq!(config.step_bound(false), 50);
        assert_eq!(config.strategy_bound, 4);
        assert!(config.consider_depth_bound_hit_as_bug);
        assert_eq!(config.no_step_limit().step_bound(false), 0);
    }

    #[test]
    fn zero_iterations_rejected() {
        let err = TestConfig::new(1).iterations(0).validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidConfig);
    }

    #[test]
    fn strategy_names_round_trip() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
        assert_eq!("Q-Learning".parse::<StrategyKind>().unwrap(), StrategyKind::QLearning);
        assert!("bogus".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn rng_uses_seed() {
        assert_eq!(TestConfig::new(11).rng().seed(), 11);
    }
}
