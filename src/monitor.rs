//! Push-based value capture.
//!
//! A [`MonitorCapture`] subscribes to a PV on construction and records the
//! most recent notification. Reading it first drains the transport's pending
//! notifications, so the freshest pushed value is visible, but nothing can
//! force the server to push: a value changed without a notification (e.g.
//! dropped by a deadband) stays invisible here while a direct read sees it.
//! That difference is exactly what the monitor assertions exist to catch.
//!
//! The subscription is released when the capture is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::access::{MonitorEvent, PvAccess, SubscriptionId};
use crate::alarm::AlarmSeverity;
use crate::error::AccessError;
use crate::value::PvValue;

/// Latest-value cache fed by a monitor subscription.
pub struct MonitorCapture {
    access: Arc<dyn PvAccess>,
    pv: String,
    latest: Arc<Mutex<Option<MonitorEvent>>>,
    subscription: SubscriptionId,
}

impl std::fmt::Debug for MonitorCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorCapture")
            .field("pv", &self.pv)
            .field("subscription", &self.subscription)
            .field("latest", &*self.latest.lock())
            .finish()
    }
}

impl MonitorCapture {
    /// Subscribe to `pv` (fully qualified).
    pub fn subscribe(access: Arc<dyn PvAccess>, pv: impl Into<String>) -> Result<Self, AccessError> {
        let pv = pv.into();
        let latest = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&latest);
        let subscription = access.subscribe(
            &pv,
            Box::new(move |event: &MonitorEvent| {
                *sink.lock() = Some(event.clone());
            }),
        )?;
        debug!(pv = %pv, id = subscription.0, "monitor subscribed");
        Ok(Self {
            access,
            pv,
            latest,
            subscription,
        })
    }

    /// The monitored PV.
    pub fn pv(&self) -> &str {
        &self.pv
    }

    /// The latest notification, after draining pending deliveries.
    pub fn current_event(&self) -> Option<MonitorEvent> {
        self.access.drain_pending_notifications();
        self.latest.lock().clone()
    }

    /// The latest pushed value, or `None` if nothing has arrived yet.
    pub fn current_value(&self) -> Option<PvValue> {
        self.current_event().map(|event| event.value)
    }

    /// Alarm severity carried by the latest notification.
    pub fn alarm_severity(&self) -> Option<AlarmSeverity> {
        self.current_event().map(|event| event.severity)
    }

    /// Alarm status carried by the latest notification.
    pub fn alarm_status(&self) -> Option<String> {
        self.current_event().map(|event| event.status)
    }
}

impl Drop for MonitorCapture {
    fn drop(&mut self) {
        self.access.unsubscribe(self.subscription);
        debug!(pv = %self.pv, id = self.subscription.0, "monitor released");
    }
}
