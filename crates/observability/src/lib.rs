//! Tracing and logging setup shared by binaries and tests.

/// Initialize process-wide tracing (JSON lines, `RUST_LOG` filter).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Install a human-readable subscriber that writes through the test harness,
/// so output is captured per test. Safe to call from every test.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Subscriber construction.
pub mod tracing;
