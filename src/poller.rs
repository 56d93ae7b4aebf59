//! Bounded condition polling.
//!
//! [`Poller::wait_until`] turns "this should eventually hold" into a loop
//! with a hard evaluation budget:
//!
//! ```text
//! start ──► evaluate ──Success──────────────────────────► Success
//!              │
//!              ├─Failure / Unreachable, budget left ─► sleep(interval) ─┐
//!              │                                                        │
//!              ◄────────────────────────────────────────────────────────┘
//!              │
//!              └─budget spent ─► evaluate once more ─► its result
//! ```
//!
//! The final evaluation after the timeout makes the reported diagnostic the
//! freshest one available rather than the one observed before the last
//! sleep. At most `floor(timeout / interval) + 2` evaluations happen, and at
//! least one, even for a zero timeout.
//!
//! Evaluation itself is not preempted: a slow `evaluate` overruns the
//! nominal timeout and the budget is only re-checked once it returns.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::AccessError;
use crate::value::{format_value, PvValue};

/// Default sleep between evaluations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Diagnostic for a condition that did not hold.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    /// What success would have looked like.
    pub expectation: String,
    /// The value observed by the evaluation that produced this failure.
    pub last_value: Option<PvValue>,
}

impl Failure {
    /// Build a failure diagnostic.
    pub fn new(expectation: impl Into<String>, last_value: Option<PvValue>) -> Self {
        Self {
            expectation: expectation.into(),
            last_value,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\nFinal PV value was {}",
            self.expectation,
            format_value(self.last_value.as_ref())
        )
    }
}

/// Result of one evaluation, and the terminal result of a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The condition holds.
    Success,
    /// The condition does not hold (yet).
    Failure(Failure),
}

impl Outcome {
    /// Shorthand for a failed evaluation.
    pub fn failure(expectation: impl Into<String>, last_value: Option<PvValue>) -> Self {
        Outcome::Failure(Failure::new(expectation, last_value))
    }

    /// True for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Fixed-interval poller.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Poller {
    /// Poller sleeping `interval` between evaluations.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Sleep between evaluations.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Evaluate `evaluate` until it succeeds or `timeout` is spent.
    ///
    /// While the budget lasts, [`AccessError::Unreachable`] is treated as "not
    /// yet" and retried; any other access error aborts the poll at once. If
    /// the final post-timeout evaluation is still unreachable its error is
    /// returned, so callers can tell a PV that never came up from a PV whose
    /// value never matched.
    pub fn wait_until<F>(&self, mut evaluate: F, timeout: Duration) -> Result<Outcome, AccessError>
    where
        F: FnMut() -> Result<Outcome, AccessError>,
    {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        while start.elapsed() < timeout {
            attempts += 1;
            match evaluate() {
                Ok(Outcome::Success) => {
                    trace!(attempts, elapsed = ?start.elapsed(), "condition met");
                    return Ok(Outcome::Success);
                }
                Ok(Outcome::Failure(failure)) => {
                    trace!(attempts, last = %format_value(failure.last_value.as_ref()), "condition not met");
                }
                Err(err) if err.is_retryable() => {
                    debug!(attempts, error = %err, "PV not reachable yet, retrying");
                }
                Err(err) => return Err(err),
            }
            thread::sleep(self.interval);
        }

        attempts += 1;
        let last = evaluate();
        match &last {
            Ok(Outcome::Success) => trace!(attempts, "condition met on final evaluation"),
            Ok(Outcome::Failure(_)) => {
                debug!(attempts, timeout = ?timeout, "condition not met within timeout")
            }
            Err(err) => debug!(attempts, error = %err, "final evaluation failed"),
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Duration = Duration::from_millis(20);

    #[test]
    fn test_immediate_success_does_not_sleep() {
        let poller = Poller::new(Duration::from_secs(5));
        let start = Instant::now();
        let mut calls = 0;
        let outcome = poller
            .wait_until(
                || {
                    calls += 1;
                    Ok(Outcome::Success)
                },
                Duration::from_secs(10),
            )
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(calls, 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_zero_timeout_evaluates_exactly_once() {
        let poller = Poller::new(FAST);
        let mut calls = 0;
        let outcome = poller
            .wait_until(
                || {
                    calls += 1;
                    Ok(Outcome::failure("never", None))
                },
                Duration::ZERO,
            )
            .unwrap();
        assert!(!outcome.is_success());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_evaluation_count_is_bounded() {
        let poller = Poller::new(FAST);
        let timeout = Duration::from_millis(100);
        let mut calls: u32 = 0;
        let _ = poller.wait_until(
            || {
                calls += 1;
                Ok(Outcome::failure("never", None))
            },
            timeout,
        );
        let bound = (timeout.as_millis() / FAST.as_millis()) as u32 + 2;
        assert!(calls >= 1);
        assert!(calls <= bound, "{calls} evaluations exceeds bound {bound}");
    }

    #[test]
    fn test_reports_last_evaluation() {
        let poller = Poller::new(FAST);
        let mut calls: i64 = 0;
        let outcome = poller
            .wait_until(
                || {
                    calls += 1;
                    Ok(Outcome::failure("count to ten", Some(PvValue::Int(calls))))
                },
                Duration::from_millis(60),
            )
            .unwrap();
        match outcome {
            Outcome::Failure(failure) => assert_eq!(failure.last_value, Some(PvValue::Int(calls))),
            Outcome::Success => panic!("expected failure"),
        }
    }

    #[test]
    fn test_unreachable_is_retried_then_succeeds() {
        let poller = Poller::new(FAST);
        let mut calls = 0;
        let outcome = poller
            .wait_until(
                || {
                    calls += 1;
                    if calls < 3 {
                        Err(AccessError::Unreachable("LEVEL".into()))
                    } else {
                        Ok(Outcome::Success)
                    }
                },
                Duration::from_secs(2),
            )
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_unreachable_on_final_evaluation_is_returned() {
        let poller = Poller::new(FAST);
        let result = poller.wait_until(
            || Err(AccessError::Unreachable("LEVEL".into())),
            Duration::from_millis(50),
        );
        assert_eq!(result, Err(AccessError::Unreachable("LEVEL".into())));
    }

    #[test]
    fn test_non_retryable_error_aborts_immediately() {
        let poller = Poller::new(FAST);
        let mut calls = 0;
        let result = poller.wait_until(
            || {
                calls += 1;
                Err(AccessError::Transport("socket closed".into()))
            },
            Duration::from_secs(5),
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new("Expected 5.", Some(PvValue::Int(4)));
        assert_eq!(failure.to_string(), "Expected 5.\nFinal PV value was 4");
    }
}
