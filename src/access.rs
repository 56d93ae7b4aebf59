//! The PV-access capability the engine is written against.
//!
//! Anything that can read, write, probe and monitor process variables can
//! drive the assertion library: a channel-access binding, a PV-access
//! binding, or the in-memory [`MockPvServer`](crate::mock::MockPvServer)
//! used by the tests. The engine never opens connections itself.

use std::time::Duration;

use crate::alarm::AlarmSeverity;
use crate::error::AccessError;
use crate::value::PvValue;

/// One change notification delivered to a monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorEvent {
    /// The pushed value.
    pub value: PvValue,
    /// Alarm severity at the time of the update.
    pub severity: AlarmSeverity,
    /// Alarm status string at the time of the update (e.g. `HIHI`).
    pub status: String,
}

impl MonitorEvent {
    /// Event with no alarm raised.
    pub fn new(value: PvValue) -> Self {
        Self {
            value,
            severity: AlarmSeverity::NoAlarm,
            status: AlarmSeverity::NoAlarm.as_str().to_string(),
        }
    }
}

/// Callback invoked for each delivered notification.
pub type MonitorCallback = Box<dyn FnMut(&MonitorEvent) + Send>;

/// Handle identifying a live monitor subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Minimal process-variable transport.
///
/// All names passed in are fully qualified (prefix already applied).
pub trait PvAccess: Send + Sync {
    /// Read the current value. Fails with [`AccessError::Unreachable`] when
    /// the PV cannot be connected.
    fn get(&self, pv: &str) -> Result<PvValue, AccessError>;

    /// Write a value, optionally waiting up to `timeout` for completion.
    fn put(&self, pv: &str, value: &PvValue, wait: bool, timeout: Duration)
        -> Result<(), AccessError>;

    /// Probe whether the PV can be connected within `timeout`.
    fn exists(&self, pv: &str, timeout: Duration) -> bool;

    /// Register `callback` for change notifications on `pv`.
    fn subscribe(&self, pv: &str, callback: MonitorCallback)
        -> Result<SubscriptionId, AccessError>;

    /// Cancel a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Deliver every notification queued so far before returning.
    fn drain_pending_notifications(&self);
}
