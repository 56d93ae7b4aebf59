//! In-memory PV server
//!
//! Provides a simulated IOC for testing the engine without a control-system
//! network. Records are plain values keyed by their full PV name; the common
//! record fields used by the assertions are emulated:
//!
//! - `<pv>.SEVR` / `<pv>.STAT` read the alarm severity and status
//! - `<pv>.SIMS` written with a severity forces a simulated alarm
//! - `<pv>.PROC` written processes the record (posts a monitor)
//!
//! Notifications are queued on every change and only delivered by
//! [`PvAccess::drain_pending_notifications`], mirroring how a channel-access
//! client delivers monitor callbacks when it is polled.
//!
//! # Example
//!
//! ```rust,ignore
//! let server = Arc::new(MockPvServer::new());
//! server.insert("TE:NDW:TEMP", 10.0);
//! server.link("TE:NDW:TEMP:SP", "TE:NDW:TEMP");
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info};

use crate::access::{MonitorCallback, MonitorEvent, PvAccess, SubscriptionId};
use crate::alarm::{AlarmSeverity, PROCESS_FIELD, SEVERITY_FIELD, SIMULATED_SEVERITY_FIELD};
use crate::error::AccessError;
use crate::fixture::DeviceBackdoor;
use crate::value::PvValue;

/// Alarm status reported while a simulated severity is in force.
const SIMULATED_STATUS: &str = "SIMM";

const STATUS_FIELD: &str = "STAT";

fn is_emulated_field(field: &str) -> bool {
    matches!(
        field,
        SEVERITY_FIELD | SIMULATED_SEVERITY_FIELD | STATUS_FIELD | PROCESS_FIELD
    )
}

struct Record {
    value: PvValue,
    initial: PvValue,
    severity: AlarmSeverity,
    status: String,
    reachable_after: Option<Instant>,
    process_count: u64,
}

impl Record {
    fn new(value: PvValue) -> Self {
        Self {
            initial: value.clone(),
            value,
            severity: AlarmSeverity::NoAlarm,
            status: AlarmSeverity::NoAlarm.as_str().to_string(),
            reachable_after: None,
            process_count: 0,
        }
    }

    fn is_reachable(&self) -> bool {
        self.reachable_after
            .map_or(true, |instant| Instant::now() >= instant)
    }

    fn event(&self) -> MonitorEvent {
        MonitorEvent {
            value: self.value.clone(),
            severity: self.severity,
            status: self.status.clone(),
        }
    }
}

struct Subscriber {
    pv: String,
    callback: Arc<Mutex<MonitorCallback>>,
}

#[derive(Default)]
struct ServerState {
    records: HashMap<String, Record>,
    links: HashMap<String, String>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    pending: VecDeque<(SubscriptionId, MonitorEvent)>,
    next_subscription: u64,
    writes: Vec<(String, PvValue)>,
    bindings: HashMap<String, String>,
    functions_called: Vec<String>,
}

impl ServerState {
    /// Queue the current state of `pv` for every subscriber of it.
    fn notify(&mut self, pv: &str) {
        let Some(event) = self.records.get(pv).map(Record::event) else {
            return;
        };
        let mut ids: Vec<SubscriptionId> = self
            .subscribers
            .iter()
            .filter(|(_, subscriber)| subscriber.pv == pv)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);
        for id in ids {
            self.pending.push_back((id, event.clone()));
        }
    }

    fn update(&mut self, pv: &str, value: PvValue, notify: bool) {
        match self.records.get_mut(pv) {
            Some(record) => record.value = value,
            None => {
                self.records.insert(pv.to_string(), Record::new(value));
            }
        }
        if notify {
            self.notify(pv);
        }
    }

    /// Split `pv` into a known record and an optional emulated field,
    /// whether or not the record is reachable yet.
    fn locate<'a>(&self, pv: &'a str) -> Option<(&'a str, Option<&'a str>)> {
        if self.records.contains_key(pv) {
            return Some((pv, None));
        }
        match pv.rsplit_once('.') {
            Some((base, field)) if self.records.contains_key(base) && is_emulated_field(field) => {
                Some((base, Some(field)))
            }
            _ => None,
        }
    }

    /// Resolve `pv` into a reachable record name and an optional field.
    fn resolve<'a>(&self, pv: &'a str) -> Result<(&'a str, Option<&'a str>), AccessError> {
        match self.locate(pv) {
            Some((base, field)) if self.records.get(base).is_some_and(Record::is_reachable) => {
                Ok((base, field))
            }
            _ => Err(AccessError::Unreachable(pv.to_string())),
        }
    }
}

/// Simulated IOC serving PVs from memory.
#[derive(Default)]
pub struct MockPvServer {
    state: Mutex<ServerState>,
}

impl MockPvServer {
    /// Create an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a record.
    pub fn insert(&self, pv: &str, value: impl Into<PvValue>) {
        self.state
            .lock()
            .records
            .insert(pv.to_string(), Record::new(value.into()));
    }

    /// Create a record that refuses connections for `delay`, like a PV whose
    /// IOC is still booting.
    pub fn insert_unreachable_for(&self, pv: &str, value: impl Into<PvValue>, delay: Duration) {
        let mut record = Record::new(value.into());
        record.reachable_after = Some(Instant::now() + delay);
        self.state.lock().records.insert(pv.to_string(), record);
    }

    /// Delete a record.
    pub fn remove(&self, pv: &str) {
        self.state.lock().records.remove(pv);
    }

    /// Change a value server-side and post a monitor.
    pub fn set(&self, pv: &str, value: impl Into<PvValue>) {
        self.state.lock().update(pv, value.into(), true);
    }

    /// Change a value without posting a monitor.
    pub fn set_silently(&self, pv: &str, value: impl Into<PvValue>) {
        self.state.lock().update(pv, value.into(), false);
    }

    /// Raise (or clear) an alarm on a record and post a monitor.
    pub fn set_alarm(&self, pv: &str, severity: AlarmSeverity, status: &str) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.get_mut(pv) {
            record.severity = severity;
            record.status = status.to_string();
            state.notify(pv);
        }
    }

    /// Mirror every write to `setpoint` into `readback`.
    pub fn link(&self, setpoint: &str, readback: &str) {
        self.state
            .lock()
            .links
            .insert(setpoint.to_string(), readback.to_string());
    }

    /// Expose a record to the device back-door under `property`.
    pub fn bind_device_property(&self, property: &str, pv: &str) {
        self.state
            .lock()
            .bindings
            .insert(property.to_string(), pv.to_string());
    }

    /// Every client write so far, in order.
    pub fn writes(&self) -> Vec<(String, PvValue)> {
        self.state.lock().writes.clone()
    }

    /// Number of times a record was processed through its `PROC` field.
    pub fn process_count(&self, pv: &str) -> u64 {
        self.state
            .lock()
            .records
            .get(pv)
            .map_or(0, |record| record.process_count)
    }

    /// Live monitor subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Back-door functions run so far.
    pub fn functions_called(&self) -> Vec<String> {
        self.state.lock().functions_called.clone()
    }

    /// Keep writing generated values to `pv` from a background thread.
    ///
    /// The thread is detached; it stops on its own once the server is dropped.
    pub fn spawn_stream<G>(self: &Arc<Self>, pv: &str, period: Duration, mut next: G)
    where
        G: FnMut() -> PvValue + Send + 'static,
    {
        let server: Weak<Self> = Arc::downgrade(self);
        let pv = pv.to_string();
        debug!(pv = %pv, period = ?period, "starting value stream");
        thread::spawn(move || {
            while let Some(server) = server.upgrade() {
                server.set(&pv, next());
                drop(server);
                thread::sleep(period);
            }
        });
    }
}

/// Generator of uniform noise around `center`, for [`MockPvServer::spawn_stream`].
pub fn noise_around(center: f64, amplitude: f64) -> impl FnMut() -> PvValue + Send + 'static {
    let amplitude = amplitude.abs();
    move || PvValue::Float(center + rand::thread_rng().gen_range(-amplitude..=amplitude))
}

/// Generator counting up from `start` by `step`.
pub fn ramp(start: f64, step: f64) -> impl FnMut() -> PvValue + Send + 'static {
    let mut current = start;
    move || {
        let value = PvValue::Float(current);
        current += step;
        value
    }
}

fn severity_from(value: &PvValue) -> Option<AlarmSeverity> {
    match value {
        PvValue::Text(text) => text.parse().ok(),
        other => other
            .as_i64()
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| AlarmSeverity::ALL.get(index).copied()),
    }
}

impl PvAccess for MockPvServer {
    fn get(&self, pv: &str) -> Result<PvValue, AccessError> {
        let state = self.state.lock();
        let (base, field) = state.resolve(pv)?;
        let record = state
            .records
            .get(base)
            .ok_or_else(|| AccessError::Unreachable(pv.to_string()))?;
        match field {
            None => Ok(record.value.clone()),
            Some(SEVERITY_FIELD) | Some(SIMULATED_SEVERITY_FIELD) => {
                Ok(PvValue::from(record.severity))
            }
            Some(STATUS_FIELD) => Ok(PvValue::Text(record.status.clone())),
            Some(PROCESS_FIELD) => Ok(PvValue::Int(0)),
            Some(_) => Err(AccessError::Unreachable(pv.to_string())),
        }
    }

    fn put(
        &self,
        pv: &str,
        value: &PvValue,
        _wait: bool,
        _timeout: Duration,
    ) -> Result<(), AccessError> {
        let mut state = self.state.lock();
        let (base, field) = state.resolve(pv)?;
        let base = base.to_string();
        state.writes.push((pv.to_string(), value.clone()));

        match field {
            None => {
                state.update(&base, value.clone(), true);
                if let Some(readback) = state.links.get(&base).cloned() {
                    state.update(&readback, value.clone(), true);
                }
            }
            Some(SIMULATED_SEVERITY_FIELD) => {
                let severity = severity_from(value).ok_or_else(|| AccessError::PutFailed {
                    pv: pv.to_string(),
                    reason: format!("{value} is not an alarm severity"),
                })?;
                if let Some(record) = state.records.get_mut(&base) {
                    record.severity = severity;
                    record.status = if severity == AlarmSeverity::NoAlarm {
                        AlarmSeverity::NoAlarm.as_str().to_string()
                    } else {
                        SIMULATED_STATUS.to_string()
                    };
                }
                state.notify(&base);
            }
            Some(PROCESS_FIELD) => {
                if let Some(record) = state.records.get_mut(&base) {
                    record.process_count += 1;
                }
                state.notify(&base);
            }
            Some(other) => {
                return Err(AccessError::PutFailed {
                    pv: pv.to_string(),
                    reason: format!("field {other} is read-only"),
                })
            }
        }
        Ok(())
    }

    fn exists(&self, pv: &str, timeout: Duration) -> bool {
        let wait = {
            let state = self.state.lock();
            let Some((base, _)) = state.locate(pv) else {
                return false;
            };
            match state.records.get(base) {
                None => return false,
                Some(record) => match record.reachable_after {
                    None => return true,
                    Some(instant) => instant.saturating_duration_since(Instant::now()),
                },
            }
        };
        if wait > timeout {
            return false;
        }
        thread::sleep(wait);
        true
    }

    fn subscribe(
        &self,
        pv: &str,
        callback: MonitorCallback,
    ) -> Result<SubscriptionId, AccessError> {
        let mut state = self.state.lock();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.subscribers.insert(
            id,
            Subscriber {
                pv: pv.to_string(),
                callback: Arc::new(Mutex::new(callback)),
            },
        );
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock();
        state.subscribers.remove(&id);
        state.pending.retain(|(pending, _)| *pending != id);
    }

    /// Callbacks run without the server lock held, so they may read, write
    /// or unsubscribe. Notifications they cause wait for the next drain.
    fn drain_pending_notifications(&self) {
        let pending = std::mem::take(&mut self.state.lock().pending);
        let mut deferred = VecDeque::new();
        for (id, event) in pending {
            let callback = self
                .state
                .lock()
                .subscribers
                .get(&id)
                .map(|subscriber| Arc::clone(&subscriber.callback));
            let Some(callback) = callback else {
                continue;
            };
            // Busy only when a callback drains from inside itself.
            match callback.try_lock() {
                Some(mut deliver) => (*deliver)(&event),
                None => deferred.push_back((id, event)),
            };
        }
        if !deferred.is_empty() {
            let mut state = self.state.lock();
            deferred.append(&mut state.pending);
            state.pending = deferred;
        }
    }
}

impl DeviceBackdoor for MockPvServer {
    fn set_on_device(&self, property: &str, value: PvValue) -> anyhow::Result<()> {
        let pv = self
            .state
            .lock()
            .bindings
            .get(property)
            .cloned()
            .ok_or_else(|| anyhow!("device has no property '{property}'"))?;
        info!(property, pv = %pv, value = %value, "backdoor set");
        self.set(&pv, value);
        Ok(())
    }

    fn run_function(&self, name: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.functions_called.push(name.to_string());
        match name {
            "reset" => {
                let names: Vec<String> = state.records.keys().cloned().collect();
                for pv in names {
                    if let Some(record) = state.records.get_mut(&pv) {
                        record.value = record.initial.clone();
                        record.severity = AlarmSeverity::NoAlarm;
                        record.status = AlarmSeverity::NoAlarm.as_str().to_string();
                    }
                    state.notify(&pv);
                }
                info!("backdoor reset");
                Ok(())
            }
            other => bail!("device has no function '{other}'"),
        }
    }
}
