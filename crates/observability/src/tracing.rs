//! Subscriber construction.
//!
//! The filter comes from `RUST_LOG`; without it, `info` for the process and
//! `debug` for the stock engine crates in tests.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";
const TEST_FILTER: &str = "info,sparestock_infra=debug";

fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// JSON logs with timestamps and span context.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or(DEFAULT_FILTER))
        .json()
        .with_current_span(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or(TEST_FILTER))
        .with_test_writer()
        .try_init();
}
