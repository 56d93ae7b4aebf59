//! Common test utilities for ioc_assert integration tests
//!
//! This module provides reusable test helpers for:
//! - Timing assertions with appropriate tolerances
//! - Environment-aware tolerance selection
//! - A mock IOC wired to a fast-polling `ChannelAccess`

#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::Arc;
use std::time::Duration;

use ioc_assert::{ChannelAccess, EngineConfig, MockPvServer, TestContext, TestMode};

/// Instrument prefix used by every integration test.
pub const PREFIX: &str = "TE:NDW:";

/// Poll interval used by every integration test.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tolerance levels for real-time timing assertions.
#[derive(Debug, Clone, Copy)]
pub enum TimingTolerance {
    /// 20% tolerance - default for local development
    Normal,
    /// 50% tolerance - for CI environments with variable load
    Relaxed,
}

impl TimingTolerance {
    /// Get the tolerance factor as a fraction (0.0 to 1.0)
    pub fn factor(&self) -> f64 {
        match self {
            TimingTolerance::Normal => 0.20,
            TimingTolerance::Relaxed => 0.50,
        }
    }
}

/// Get appropriate timing tolerance based on environment.
pub fn env_timing_tolerance() -> TimingTolerance {
    if std::env::var("CI").is_ok() {
        TimingTolerance::Relaxed
    } else {
        TimingTolerance::Normal
    }
}

/// Assert that a poll lasted at least `timeout` and overran it by no more
/// than one interval plus scheduling slack.
///
/// # Panics
/// Panics if `actual` falls outside that window.
pub fn assert_poll_duration(actual: Duration, timeout: Duration, interval: Duration, context: &str) {
    let tolerance = env_timing_tolerance();
    let max = (timeout + interval).mul_f64(1.0 + tolerance.factor()) + Duration::from_millis(20);

    assert!(
        actual >= timeout && actual <= max,
        "{}: expected between {:?} and {:?}, got {:?}",
        context,
        timeout,
        max,
        actual
    );
}

/// Configuration tuned for fast tests: short timeouts and no settle time.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        prefix: PREFIX.to_string(),
        default_timeout: Duration::from_millis(300),
        poll_interval: POLL_INTERVAL,
        settle_after_put: Duration::ZERO,
        absence_timeout: Duration::from_millis(50),
        put_existence_timeout: Duration::from_millis(100),
        ..Default::default()
    }
}

/// Full PV name under the test prefix.
pub fn pv(name: &str) -> String {
    format!("{PREFIX}{name}")
}

/// A mock IOC and an assertion library bound to it.
pub fn mock_channel_access() -> (Arc<MockPvServer>, ChannelAccess) {
    let server = Arc::new(MockPvServer::new());
    let ca = ChannelAccess::new(server.clone(), &fast_config());
    (server, ca)
}

/// A device-simulation context whose back-door is the mock IOC itself.
pub fn devsim_context() -> (Arc<MockPvServer>, TestContext) {
    let (server, ca) = mock_channel_access();
    let ctx = TestContext::new(ca, TestMode::DevSim).with_backdoor(server.clone());
    (server, ctx)
}
