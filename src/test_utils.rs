//! Helpers shared by the unit tests, the integration tests and doctests.
//!
//! Logging goes through a `tracing` fmt subscriber bound to the test writer.
//! The filter defaults to `debug` and is overridden by `STEPWISE_TEST_LOG`,
//! e.g. `STEPWISE_TEST_LOG=stepwise::runtime=trace` to see every scheduling
//! decision.
//!
//! ```
//! use stepwise::test_utils::{init_test_logging, test_engine};
//!
//! init_test_logging();
//! let mut engine = test_engine(stepwise::StrategyKind::Dfs, 16);
//! let report = engine.run(|rt| rt.yield_now());
//! assert!(!report.has_bugs());
//! ```

use std::sync::Once;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::config::{StrategyKind, TestConfig};
use crate::engine::TestingEngine;

/// Environment variable holding the test log filter directives.
pub const TEST_LOG_ENV: &str = "STEPWISE_TEST_LOG";

/// Seed used by every helper that builds a configuration.
pub const DEFAULT_TEST_SEED: u64 = 0xDEAD_BEEF;

static INIT_LOGGING: Once = Once::new();
#[cfg(test)]
static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

/// Installs the test subscriber at `debug`, unless [`TEST_LOG_ENV`] says
/// otherwise. Later calls do nothing.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::DEBUG);
}

/// Same as [`init_test_logging`] with a different default level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_env(TEST_LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Serializes unit tests that touch process environment variables.
#[cfg(test)]
pub(crate) fn env_lock() -> parking_lot::MutexGuard<'static, ()> {
    ENV_LOCK.lock()
}

/// `strategy` for `iterations` runs from [`DEFAULT_TEST_SEED`], stopping at
/// the first bug.
#[must_use]
pub const fn test_config(strategy: StrategyKind, iterations: u64) -> TestConfig {
    TestConfig::new(DEFAULT_TEST_SEED)
        .strategy(strategy)
        .iterations(iterations)
        .stop_on_first_bug(true)
}

/// Engine over [`test_config`].
///
/// # Panics
///
/// Panics if `iterations` is zero.
#[must_use]
pub fn test_engine(strategy: StrategyKind, iterations: u64) -> TestingEngine {
    test_engine_with_config(test_config(strategy, iterations))
}

/// Engine over an explicit configuration.
///
/// # Panics
///
/// Panics if the configuration is rejected.
#[must_use]
pub fn test_engine_with_config(config: TestConfig) -> TestingEngine {
    TestingEngine::new(config).unwrap_or_else(|err| panic!("invalid test configuration: {err}"))
}

/// Logs the start of a test.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(test = %$name, "==== {} ====", $name);
    };
}

/// Logs a named step inside a test.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "-- {}", $name);
    };
}

/// Logs the end of a test with optional `key = value` fields.
#[macro_export]
macro_rules! test_complete {
    ($name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(test = %$name, $($key = %$value,)* "passed: {}", $name);
    };
}

/// `assert!` that logs what it compares first.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {{
        tracing::debug!(expected = ?$expected, actual = ?$actual, "checking: {}", $msg);
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    }};
}
