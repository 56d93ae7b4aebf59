//! Error types for the assertion engine.
//!
//! Two layers of error exist:
//!
//! - **`AccessError`**: raised by a [`PvAccess`](crate::access::PvAccess)
//!   implementation. `Unreachable` is the only retryable kind; the poller
//!   swallows it while the timeout budget lasts.
//! - **`AssertError`**: what every assertion returns. `Failed` is the expected
//!   failure mode and always carries the expectation plus the last observed
//!   value. `NeverReachable` is kept distinct from `Failed` so a test report
//!   separates "the IOC never came up" from "the IOC came up with the wrong
//!   value".
//!
//! Numeric coercion problems are not errors at all: a value that cannot be
//! compared is a value that does not match.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::poller::Failure;

/// Convenience alias for results returned by assertions.
pub type AssertResult<T> = std::result::Result<T, AssertError>;

/// Failure reported by the underlying PV transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Unable to connect to PV {0}")]
    Unreachable(String),

    #[error("Write to PV {pv} failed: {reason}")]
    PutFailed { pv: String, reason: String },

    #[error("Monitor on PV {pv} could not be created: {reason}")]
    SubscribeFailed { pv: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl AccessError {
    /// True when the endpoint simply is not connectable yet.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccessError::Unreachable(_))
    }
}

/// Failure of a single assertion.
#[derive(Error, Debug)]
pub enum AssertError {
    #[error("{0}")]
    Failed(Failure),

    #[error("PV {0} does not exist")]
    Missing(String),

    #[error("PV {0} exists")]
    Present(String),

    #[error("PV {pv} never became reachable within {timeout:?}")]
    NeverReachable {
        pv: String,
        timeout: Duration,
        #[source]
        source: AccessError,
    },

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AssertError {
    /// True for a condition that was checked and did not hold.
    pub fn is_assertion_failure(&self) -> bool {
        matches!(
            self,
            AssertError::Failed(_) | AssertError::Missing(_) | AssertError::Present(_)
        )
    }

    /// The failure diagnostic, when the error came out of the poller.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            AssertError::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}
