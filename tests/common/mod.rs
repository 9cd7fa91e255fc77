#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use stepwise::{ExplorationReport, StrategyKind, TestConfig, TestingEngine};

pub use stepwise::test_utils::{init_test_logging, DEFAULT_TEST_SEED};
pub use stepwise::{assert_with_log, test_complete, test_phase, test_section};

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "STEPWISE_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// A configuration with the default test seed.
#[must_use]
pub fn test_config(strategy: StrategyKind, iterations: u64) -> TestConfig {
    TestConfig::new(DEFAULT_TEST_SEED)
        .strategy(strategy)
        .iterations(iterations)
}

/// Runs `test` under `config`.
pub fn explore<F>(config: TestConfig, test: F) -> ExplorationReport
where
    F: Fn(&stepwise::ControlledRuntime) -> stepwise::Result<()> + Send + Sync + 'static,
{
    let mut engine = TestingEngine::new(config).expect("valid test config");
    engine.run(test)
}
