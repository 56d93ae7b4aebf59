//! Tracing setup for test binaries.

use tracing_subscriber::EnvFilter;

/// Install a formatted tracing subscriber writing through the test harness.
///
/// `RUST_LOG` wins over `level` when set. Safe to call from every test:
/// returns false once a subscriber is already installed.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}
