//! Environment variable and config file support for [`TestConfig`].
//!
//! # Configuration Precedence
//!
//! 1. **Programmatic**: builder methods applied after loading
//! 2. **Environment variables**: `STEPWISE_*`
//! 3. **Config file**: TOML (requires the `config-file` feature)
//! 4. **Defaults**: [`TestConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `STEPWISE_SEED` | `u64` | `seed` |
//! | `STEPWISE_ITERATIONS` | `u64` | `iterations` |
//! | `STEPWISE_STRATEGY` | `StrategyKind` | `strategy` |
//! | `STEPWISE_MAX_STEPS` | `u64` | `max_unfair_steps` |
//! | `STEPWISE_MAX_FAIR_STEPS` | `u64` | `max_fair_steps` |
//! | `STEPWISE_STRATEGY_BOUND` | `usize` | `strategy_bound` |
//! | `STEPWISE_DEPTH_BOUND_BUG` | `bool` | `consider_depth_bound_hit_as_bug` |
//! | `STEPWISE_ABSTRACTION` | `AbstractionLevel` | `abstraction_level` |

use super::{StrategyKind, TestConfig};
use crate::error::{Error, Result};
use crate::runtime::AbstractionLevel;

/// Environment variable name for the campaign seed.
pub const ENV_SEED: &str = "STEPWISE_SEED";
/// Environment variable name for the iteration count.
pub const ENV_ITERATIONS: &str = "STEPWISE_ITERATIONS";
/// Environment variable name for the strategy.
pub const ENV_STRATEGY: &str = "STEPWISE_STRATEGY";
/// Environment variable name for the unfair step bound.
pub const ENV_MAX_STEPS: &str = "STEPWISE_MAX_STEPS";
/// Environment variable name for the fair step bound.
pub const ENV_MAX_FAIR_STEPS: &str = "STEPWISE_MAX_FAIR_STEPS";
/// Environment variable name for the strategy bound.
pub const ENV_STRATEGY_BOUND: &str = "STEPWISE_STRATEGY_BOUND";
/// Environment variable name for treating the step bound as a bug.
pub const ENV_DEPTH_BOUND_BUG: &str = "STEPWISE_DEPTH_BOUND_BUG";
/// Environment variable name for the Q-learning abstraction level.
pub const ENV_ABSTRACTION: &str = "STEPWISE_ABSTRACTION";

/// Apply environment variable overrides to a [`TestConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut TestConfig) -> Result<()> {
    if let Some(val) = read_env(ENV_SEED) {
        config.seed = parse_u64(ENV_SEED, &val)?;
    }
    if let Some(val) = read_env(ENV_ITERATIONS) {
        config.iterations = parse_u64(ENV_ITERATIONS, &val)?;
    }
    if let Some(val) = read_env(ENV_STRATEGY) {
        config.strategy = val.parse::<StrategyKind>().map_err(|e| {
            Error::invalid_config(format!("invalid value for {ENV_STRATEGY}: {e}"))
        })?;
    }
    if let Some(val) = read_env(ENV_MAX_STEPS) {
        config.max_unfair_steps = parse_u64(ENV_MAX_STEPS, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_FAIR_STEPS) {
        config.max_fair_steps = parse_u64(ENV_MAX_FAIR_STEPS, &val)?;
    }
    if let Some(val) = read_env(ENV_STRATEGY_BOUND) {
        config.strategy_bound = parse_usize(ENV_STRATEGY_BOUND, &val)?;
    }
    if let Some(val) = read_env(ENV_DEPTH_BOUND_BUG) {
        config.consider_depth_bound_hit_as_bug = parse_bool(ENV_DEPTH_BOUND_BUG, &val)?;
    }
    if let Some(val) = read_env(ENV_ABSTRACTION) {
        config.abstraction_level = val.parse::<AbstractionLevel>().map_err(|e| {
            Error::invalid_config(format!("invalid value for {ENV_ABSTRACTION}: {e}"))
        })?;
    }
    Ok(())
}

/// Builds a default configuration with environment overrides applied.
pub fn from_env() -> Result<TestConfig> {
    let mut config = TestConfig::default();
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64> {
    val.trim().parse::<u64>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize> {
    val.trim().parse::<usize>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::invalid_config(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable campaign configuration.
///
/// ```toml
/// [exploration]
/// strategy = "pct"
/// seed = 7
/// iterations = 1000
/// strategy_bound = 3
/// abstraction_level = "full"
/// stop_on_first_bug = true
///
/// [bounds]
/// max_unfair_steps = 10000
/// max_fair_steps = 100000
/// depth_bound_is_bug = false
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct TestTomlConfig {
    /// Strategy and campaign settings.
    #[serde(default)]
    pub exploration: ExplorationToml,
    /// Step bound settings.
    #[serde(default)]
    pub bounds: BoundsToml,
}

/// Exploration section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ExplorationToml {
    /// Strategy name.
    pub strategy: Option<StrategyKind>,
    /// Campaign seed.
    pub seed: Option<u64>,
    /// Iteration count.
    pub iterations: Option<u64>,
    /// PCT change points, delays, or coin flips.
    pub strategy_bound: Option<usize>,
    /// Q-learning abstraction level.
    pub abstraction_level: Option<AbstractionLevel>,
    /// Forget the Q-table after a bug.
    pub qlearning_reset_on_bug: Option<bool>,
    /// Stop at the first bug.
    pub stop_on_first_bug: Option<bool>,
}

/// Bounds section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct BoundsToml {
    /// Step bound for unfair strategies.
    pub max_unfair_steps: Option<u64>,
    /// Step bound for fair strategies.
    pub max_fair_steps: Option<u64>,
    /// Report the step bound as a bug.
    pub depth_bound_is_bug: Option<bool>,
}

/// Apply a parsed TOML config to a [`TestConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut TestConfig, toml: &TestTomlConfig) {
    if let Some(v) = toml.exploration.strategy {
        config.strategy = v;
    }
    if let Some(v) = toml.exploration.seed {
        config.seed = v;
    }
    if let Some(v) = toml.exploration.iterations {
        config.iterations = v;
    }
    if let Some(v) = toml.exploration.strategy_bound {
        config.strategy_bound = v;
    }
    if let Some(v) = toml.exploration.abstraction_level {
        config.abstraction_level = v;
    }
    if let Some(v) = toml.exploration.qlearning_reset_on_bug {
        config.qlearning_reset_on_bug = v;
    }
    if let Some(v) = toml.exploration.stop_on_first_bug {
        config.stop_on_first_bug = v;
    }
    if let Some(v) = toml.bounds.max_unfair_steps {
        config.max_unfair_steps = v;
    }
    if let Some(v) = toml.bounds.max_fair_steps {
        config.max_fair_steps = v;
    }
    if let Some(v) = toml.bounds.depth_bound_is_bug {
        config.consider_depth_bound_hit_as_bug = v;
    }
}

/// Parse a TOML string into a [`TestTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<TestTomlConfig> {
    toml::from_str(toml_str)
        .map_err(|e| Error::invalid_config(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`TestTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<TestTomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::invalid_config(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}

/// Loads a file, then applies environment overrides on top.
#[cfg(feature = "config-file")]
pub fn load(path: &std::path::Path) -> Result<TestConfig> {
    let mut config = TestConfig::default();
    apply_toml_config(&mut config, &parse_toml_file(path)?);
    apply_env_overrides(&mut config)?;
    Ok(config)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 8] = [
        ENV_SEED,
        ENV_ITERATIONS,
        ENV_STRATEGY,
        ENV_MAX_STEPS,
        ENV_MAX_FAIR_STEPS,
        ENV_STRATEGY_BOUND,
        ENV_DEPTH_BOUND_BUG,
        ENV_ABSTRACTION,
    ];

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let result = f();
        for (k, _) in vars {
            std::env::remove_var(k);
        }
        result
    }

    // --- parse helpers ---

    #[test]
    fn parse_u64_valid() {
        assert_eq!(parse_u64("TEST", "42").unwrap(), 42);
        assert_eq!(parse_u64("TEST", " 100 ").unwrap(), 100);
    }

    #[test]
    fn parse_u64_invalid() {
        let err = parse_u64("TEST", "-1").unwrap_err();
        assert!(err.message().unwrap().contains("TEST"));
    }

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "on"] {
            assert!(parse_bool("TEST", v).unwrap());
        }
        for v in ["false", "0", "no", "Off"] {
            assert!(!parse_bool("TEST", v).unwrap());
        }
        assert!(parse_bool("TEST", "maybe").is_err());
    }

    // --- overrides ---

    #[test]
    fn no_vars_leaves_config_untouched() {
        let config = with_envs(&[], || {
            let mut config = TestConfig::new(9);
            apply_env_overrides(&mut config).unwrap();
            config
        });
        assert_eq!(config, TestConfig::new(9));
    }

    #[test]
    fn overrides_applied() {
        let config = with_envs(
            &[
                (ENV_SEED, "77"),
                (ENV_ITERATIONS, "12"),
                (ENV_STRATEGY, "pct"),
                (ENV_MAX_STEPS, "300"),
                (ENV_STRATEGY_BOUND, "5"),
                (ENV_DEPTH_BOUND_BUG, "yes"),
                (ENV_ABSTRACTION, "full"),
            ],
            || from_env().unwrap(),
        );
        assert_eq!(config.seed, 77);
        assert_eq!(config.iterations, 12);
        assert_eq!(config.strategy, StrategyKind::Pct);
        assert_eq!(config.max_unfair_steps, 300);
        assert_eq!(config.max_fair_steps, TestConfig::DEFAULT_MAX_FAIR_STEPS);
        assert_eq!(config.strategy_bound, 5);
        assert!(config.consider_depth_bound_hit_as_bug);
        assert_eq!(config.abstraction_level, AbstractionLevel::Full);
    }

    #[test]
    fn bad_strategy_rejected() {
        let err = with_envs(&[(ENV_STRATEGY, "fastest")], || from_env().unwrap_err());
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidConfig);
        assert!(err.message().unwrap().contains(ENV_STRATEGY));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_sections_applied() {
        let toml = parse_toml_str(
            r#"
            [exploration]
            strategy = "qlearning"
            seed = 3
            abstraction_level = "inbox-only"

            [bounds]
            max_fair_steps = 64
            depth_bound_is_bug = true
            "#,
        )
        .unwrap();
        let mut config = TestConfig::default();
        apply_toml_config(&mut config, &toml);
        assert_eq!(config.strategy, StrategyKind::QLearning);
        assert_eq!(config.seed, 3);
        assert_eq!(config.abstraction_level, AbstractionLevel::InboxOnly);
        assert_eq!(config.max_fair_steps, 64);
        assert!(config.consider_depth_bound_hit_as_bug);
        assert_eq!(config.iterations, 100);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_garbage_rejected() {
        assert!(parse_toml_str("[exploration\nseed=").is_err());
    }
}
