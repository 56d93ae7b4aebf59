//! Named assertions over process variables.
//!
//! [`ChannelAccess`] is what a test talks to. Every assertion follows the
//! same shape: pick a value source (a direct read, or a [`MonitorCapture`]),
//! wrap the check in a closure, hand it to the [`Poller`], and turn a final
//! [`Outcome::Failure`] into [`AssertError::Failed`] whose message reads
//!
//! ```text
//! <expectation>
//! Final PV value was <last observed value>
//! ```
//!
//! All PV names given to these methods are local; the configured prefix is
//! prepended, and diagnostics show the full name.
//!
//! # Example
//!
//! ```rust,ignore
//! let ca = ChannelAccess::new(access, &config).with_device_prefix("EUROTHRM_01");
//! ca.assert_setpoint_sets_readback(25.0, "TEMP", SetpointOptions::default())?;
//! ca.assert_is_number("TEMP", 25.0, 0.1, Duration::from_secs(60))?;
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::access::PvAccess;
use crate::alarm::{field_of, AlarmSeverity, PROCESS_FIELD, SEVERITY_FIELD, SIMULATED_SEVERITY_FIELD};
use crate::config::EngineConfig;
use crate::error::{AccessError, AssertError, AssertResult};
use crate::monitor::MonitorCapture;
use crate::poller::{Outcome, Poller};
use crate::tolerance::{integer_in_range, within_tolerance};
use crate::value::{format_value, format_values, PvValue};

/// Per-call timeout and message override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssertOptions {
    /// Budget for the poll; the configured default when `None`.
    pub timeout: Option<Duration>,
    /// Replaces the default expectation text. The final-value line is
    /// appended regardless.
    pub message: Option<String>,
}

impl AssertOptions {
    /// Options with an explicit timeout.
    pub fn within(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            message: None,
        }
    }

    /// Replace the expectation text.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl From<Duration> for AssertOptions {
    fn from(timeout: Duration) -> Self {
        Self::within(timeout)
    }
}

impl From<Option<Duration>> for AssertOptions {
    fn from(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            message: None,
        }
    }
}

/// How a write is performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Wait for the put-completion callback. Leave off unless the record
    /// is known to complete: a put that never completes blocks the test.
    pub wait: bool,
    /// Sleep after the write; the configured default when `None`.
    pub settle: Option<Duration>,
}

/// Parameters of [`ChannelAccess::assert_setpoint_sets_readback`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetpointOptions {
    /// Setpoint PV; `<readback>:SP` when `None`.
    pub setpoint_pv: Option<String>,
    /// Expected readback; the written value when `None`.
    pub expected_value: Option<PvValue>,
    /// Expected readback alarm; not checked when `None`.
    pub expected_alarm: Option<AlarmSeverity>,
    /// Budget for each of the readback and alarm checks.
    pub timeout: Option<Duration>,
}

impl Default for SetpointOptions {
    fn default() -> Self {
        Self {
            setpoint_pv: None,
            expected_value: None,
            expected_alarm: Some(AlarmSeverity::NoAlarm),
            timeout: None,
        }
    }
}

impl SetpointOptions {
    /// Write to this PV instead of `<readback>:SP`.
    pub fn setpoint(mut self, pv: impl Into<String>) -> Self {
        self.setpoint_pv = Some(pv.into());
        self
    }

    /// Expect this readback instead of the written value.
    pub fn expect(mut self, value: impl Into<PvValue>) -> Self {
        self.expected_value = Some(value.into());
        self
    }

    /// Expect this alarm on the readback; `None` skips the check.
    pub fn alarm(mut self, alarm: Option<AlarmSeverity>) -> Self {
        self.expected_alarm = alarm;
        self
    }

    /// Budget for each readback check.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Direction a value should move over a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    /// Final value greater than the initial one.
    Increasing,
    /// Final value less than the initial one.
    Decreasing,
    /// Final value equal to the initial one.
    Unchanged,
}

impl Trend {
    /// Name of the comparator applied as `comparator(final, initial)`.
    pub fn comparator(&self) -> &'static str {
        match self {
            Trend::Increasing => "gt",
            Trend::Decreasing => "lt",
            Trend::Unchanged => "eq",
        }
    }

    /// Whether the move from `initial` to `last` satisfies this trend.
    pub fn holds(&self, last: &PvValue, initial: &PvValue) -> bool {
        match self {
            Trend::Increasing => last > initial,
            Trend::Decreasing => last < initial,
            Trend::Unchanged => last == initial,
        }
    }
}

#[derive(Clone, Copy)]
enum ValueSource<'a> {
    Poll,
    Monitor(&'a MonitorCapture),
}

/// Assertion library bound to one PV prefix.
pub struct ChannelAccess {
    access: Arc<dyn PvAccess>,
    prefix: String,
    default_timeout: Duration,
    settle_after_put: Duration,
    absence_timeout: Duration,
    put_existence_timeout: Duration,
    poller: Poller,
}

impl std::fmt::Debug for ChannelAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAccess")
            .field("prefix", &self.prefix)
            .field("default_timeout", &self.default_timeout)
            .field("poller", &self.poller)
            .finish()
    }
}

impl ChannelAccess {
    /// Bind `access` with the timeouts and prefix from `config`.
    pub fn new(access: Arc<dyn PvAccess>, config: &EngineConfig) -> Self {
        Self {
            access,
            prefix: config.pv_prefix(),
            default_timeout: config.default_timeout,
            settle_after_put: config.settle_after_put,
            absence_timeout: config.absence_timeout,
            put_existence_timeout: config.put_existence_timeout,
            poller: Poller::new(config.poll_interval),
        }
    }

    /// Bind `access` with configuration loaded from `ioc_tests.toml` and the
    /// environment.
    pub fn from_environment(access: Arc<dyn PvAccess>) -> AssertResult<Self> {
        let config = EngineConfig::load()?;
        Ok(Self::new(access, &config))
    }

    /// Append a device prefix (`DEVICE:`) to the current prefix.
    pub fn with_device_prefix(mut self, device_prefix: &str) -> Self {
        self.prefix.push_str(device_prefix);
        self.prefix.push(':');
        self
    }

    /// Full name of a local PV.
    pub fn prefixed(&self, pv: &str) -> String {
        format!("{}{}", self.prefix, pv)
    }

    /// The prefix prepended to every PV.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Timeout applied when an assertion is given none.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The underlying transport.
    pub fn access(&self) -> &Arc<dyn PvAccess> {
        &self.access
    }

    // =========================================================================
    // Reads and writes
    // =========================================================================

    /// Current value of a PV.
    pub fn get_pv_value(&self, pv: &str) -> AssertResult<PvValue> {
        Ok(self.access.get(&self.prefixed(pv))?)
    }

    /// Write a value, then give the IOC time to process it.
    ///
    /// The PV must exist first: writes issued while the IOC is still
    /// starting fail with [`AssertError::Missing`] instead of a protocol
    /// error.
    pub fn set_pv_value(&self, pv: &str, value: impl Into<PvValue>) -> AssertResult<()> {
        self.set_pv_value_with(pv, value, PutOptions::default())
    }

    /// [`set_pv_value`](Self::set_pv_value) with explicit put options.
    pub fn set_pv_value_with(
        &self,
        pv: &str,
        value: impl Into<PvValue>,
        options: PutOptions,
    ) -> AssertResult<()> {
        let value = value.into();
        self.assert_exists(pv, Some(self.put_existence_timeout))?;

        let full = self.prefixed(pv);
        info!(pv = %full, value = %value, wait = options.wait, "writing PV");
        self.access
            .put(&full, &value, options.wait, self.default_timeout)?;

        let settle = options.settle.unwrap_or(self.settle_after_put);
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        Ok(())
    }

    /// Process a record once by writing its `PROC` field.
    pub fn process_pv(&self, pv: &str) -> AssertResult<()> {
        let field = field_of(&self.prefixed(pv), PROCESS_FIELD);
        debug!(pv = %field, "processing record");
        Ok(self
            .access
            .put(&field, &PvValue::Int(1), false, self.default_timeout)?)
    }

    /// Force a simulated alarm onto a record until the returned guard drops.
    ///
    /// The alarm is asserted to have taken effect before this returns. The
    /// guard restores `NO_ALARM` on drop, so a failing test cannot leave the
    /// record in alarm; call [`SimulatedAlarm::clear`] to see whether the
    /// restore itself succeeded.
    pub fn simulate_alarm(
        &self,
        pv: &str,
        severity: AlarmSeverity,
    ) -> AssertResult<SimulatedAlarm<'_>> {
        info!(pv = %self.prefixed(pv), severity = %severity, "simulating alarm");
        let guard = SimulatedAlarm {
            ca: self,
            pv: pv.to_string(),
            active: true,
        };
        self.set_and_check_simulated_alarm(pv, severity)?;
        Ok(guard)
    }

    fn set_and_check_simulated_alarm(&self, pv: &str, severity: AlarmSeverity) -> AssertResult<()> {
        self.set_pv_value(&field_of(pv, SIMULATED_SEVERITY_FIELD), severity)?;
        self.assert_alarm_is(pv, severity, AssertOptions::default())
    }

    // =========================================================================
    // Polled assertions
    // =========================================================================

    fn check<F>(
        &self,
        pv: &str,
        source: ValueSource<'_>,
        expectation: String,
        timeout: Option<Duration>,
        condition: F,
    ) -> AssertResult<()>
    where
        F: Fn(&PvValue) -> bool,
    {
        let full = self.prefixed(pv);
        let timeout = timeout.unwrap_or(self.default_timeout);
        debug!(pv = %full, timeout = ?timeout, expectation = %expectation, "waiting for condition");

        let outcome = self.poller.wait_until(
            || {
                let observed = match source {
                    ValueSource::Poll => Some(self.access.get(&full)?),
                    ValueSource::Monitor(capture) => capture.current_value(),
                };
                Ok(match observed {
                    Some(value) if condition(&value) => Outcome::Success,
                    observed => Outcome::failure(expectation.clone(), observed),
                })
            },
            timeout,
        );

        match outcome {
            Ok(Outcome::Success) => Ok(()),
            Ok(Outcome::Failure(failure)) => Err(AssertError::Failed(failure)),
            Err(err) => Err(access_failure(full, timeout, err)),
        }
    }

    /// Assert that `condition` holds for the PV's value, now or within the
    /// timeout.
    pub fn assert_that<F>(
        &self,
        pv: &str,
        description: &str,
        condition: F,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()>
    where
        F: Fn(&PvValue) -> bool,
    {
        let options = options.into();
        let expectation = options.message.unwrap_or_else(|| {
            format!(
                "Expected condition '{}' to hold when reading PV '{}'.",
                description,
                self.prefixed(pv)
            )
        });
        self.check(pv, ValueSource::Poll, expectation, options.timeout, condition)
    }

    /// Assert that the PV has, or comes to have, `expected`.
    pub fn assert_equals(
        &self,
        pv: &str,
        expected: impl Into<PvValue>,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        self.equals_from(pv, ValueSource::Poll, expected.into(), options.into())
    }

    fn equals_from(
        &self,
        pv: &str,
        source: ValueSource<'_>,
        expected: PvValue,
        options: AssertOptions,
    ) -> AssertResult<()> {
        let expectation = options.message.unwrap_or_else(|| {
            format!(
                "Expected PV '{}' to have value {}.",
                self.prefixed(pv),
                format_value(Some(&expected))
            )
        });
        self.check(pv, source, expectation, options.timeout, |value| {
            *value == expected
        })
    }

    /// Assert that the PV does not have, or moves away from, `restricted`.
    pub fn assert_not_equals(
        &self,
        pv: &str,
        restricted: impl Into<PvValue>,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        let restricted = restricted.into();
        let options = options.into();
        let expectation = options.message.unwrap_or_else(|| {
            format!(
                "Expected PV '{}' to not have value {}.",
                self.prefixed(pv),
                format_value(Some(&restricted))
            )
        });
        self.check(pv, ValueSource::Poll, expectation, options.timeout, |value| {
            *value != restricted
        })
    }

    /// Assert that the PV is numerically within `tolerance` of `expected`.
    pub fn assert_is_number(
        &self,
        pv: &str,
        expected: f64,
        tolerance: f64,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        self.number_from(pv, ValueSource::Poll, expected, tolerance, options.into())
    }

    fn number_from(
        &self,
        pv: &str,
        source: ValueSource<'_>,
        expected: f64,
        tolerance: f64,
        options: AssertOptions,
    ) -> AssertResult<()> {
        let expectation = options.message.unwrap_or_else(|| {
            format!(
                "Expected PV '{}' value to be equal to {} (tolerance: {})",
                self.prefixed(pv),
                format_value(Some(&PvValue::Float(expected))),
                format_value(Some(&PvValue::Float(tolerance)))
            )
        });
        self.check(pv, source, expectation, options.timeout, |value| {
            within_tolerance(value, expected, tolerance)
        })
    }

    /// Assert that the PV is, or moves, at least `tolerance` away from
    /// `restricted`. Non-numeric values count as away.
    pub fn assert_is_not_number(
        &self,
        pv: &str,
        restricted: f64,
        tolerance: f64,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        let options = options.into();
        let expectation = options.message.unwrap_or_else(|| {
            format!(
                "Expected PV '{}' value to be not equal to {} (tolerance: {})",
                self.prefixed(pv),
                format_value(Some(&PvValue::Float(restricted))),
                format_value(Some(&PvValue::Float(tolerance)))
            )
        });
        self.check(pv, ValueSource::Poll, expectation, options.timeout, |value| {
            !within_tolerance(value, restricted, tolerance)
        })
    }

    /// Assert that the PV's value is one of `expected`.
    pub fn assert_one_of<I, V>(
        &self,
        pv: &str,
        expected: I,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<PvValue>,
    {
        let expected: Vec<PvValue> = expected.into_iter().map(Into::into).collect();
        let options = options.into();
        let expectation = options.message.unwrap_or_else(|| {
            format!(
                "Expected PV '{}' value to be in {}",
                self.prefixed(pv),
                format_values(&expected)
            )
        });
        self.check(pv, ValueSource::Poll, expectation, options.timeout, |value| {
            expected.contains(value)
        })
    }

    /// Assert that the PV's value is an integer in `min..=max`.
    pub fn assert_integer_in_range(
        &self,
        pv: &str,
        min: i64,
        max: i64,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        let options = options.into();
        let expectation = options.message.unwrap_or_else(|| {
            format!(
                "Expected PV '{}' value to be an integer between {} and {}",
                self.prefixed(pv),
                min,
                max
            )
        });
        self.check(pv, ValueSource::Poll, expectation, options.timeout, |value| {
            integer_in_range(value, min, max)
        })
    }

    /// Assert that the PV's alarm severity is, or becomes, `alarm`.
    pub fn assert_alarm_is(
        &self,
        pv: &str,
        alarm: AlarmSeverity,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        self.assert_equals(&field_of(pv, SEVERITY_FIELD), alarm, options)
    }

    /// Assert that the PV's alarm severity is not, or leaves, `alarm`.
    pub fn assert_alarm_is_not(
        &self,
        pv: &str,
        alarm: AlarmSeverity,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        self.assert_not_equals(&field_of(pv, SEVERITY_FIELD), alarm, options)
    }

    /// Process the record, then assert its value.
    pub fn assert_after_processing_is(
        &self,
        pv: &str,
        expected: impl Into<PvValue>,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        self.process_pv(pv)?;
        self.assert_equals(pv, expected, options)
    }

    /// Write a setpoint and check the readback follows.
    ///
    /// Three steps, each aborting the assertion on failure: write `value` to
    /// the setpoint PV, wait for the readback to equal the expected value,
    /// then (unless disabled) wait for the readback's alarm to match.
    pub fn assert_setpoint_sets_readback(
        &self,
        value: impl Into<PvValue>,
        readback_pv: &str,
        options: SetpointOptions,
    ) -> AssertResult<()> {
        let value = value.into();
        let setpoint = options
            .setpoint_pv
            .unwrap_or_else(|| format!("{readback_pv}:SP"));
        let expected = options.expected_value.unwrap_or_else(|| value.clone());

        self.set_pv_value(&setpoint, value)?;
        self.assert_equals(readback_pv, expected, options.timeout)?;
        if let Some(alarm) = options.expected_alarm {
            self.assert_alarm_is(readback_pv, alarm, options.timeout)?;
        }
        Ok(())
    }

    // =========================================================================
    // Existence probes
    // =========================================================================

    /// Assert that the PV can be connected within the timeout.
    pub fn assert_exists(&self, pv: &str, timeout: Option<Duration>) -> AssertResult<()> {
        let full = self.prefixed(pv);
        if self
            .access
            .exists(&full, timeout.unwrap_or(self.default_timeout))
        {
            Ok(())
        } else {
            Err(AssertError::Missing(full))
        }
    }

    /// Assert that the PV cannot be connected within the timeout
    /// (two seconds unless configured otherwise).
    pub fn assert_does_not_exist(&self, pv: &str, timeout: Option<Duration>) -> AssertResult<()> {
        let full = self.prefixed(pv);
        if self
            .access
            .exists(&full, timeout.unwrap_or(self.absence_timeout))
        {
            Err(AssertError::Present(full))
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Trends
    // =========================================================================

    /// Read the PV, wait, and check the new value against the initial one.
    ///
    /// The final value is read exactly once; it is not polled.
    pub fn assert_value_over_time(&self, pv: &str, wait: Duration, trend: Trend) -> AssertResult<()> {
        let full = self.prefixed(pv);
        let initial = self
            .access
            .get(&full)
            .map_err(|err| access_failure(full, Duration::ZERO, err))?;
        thread::sleep(wait);

        let expectation = format!(
            "Expected PV '{}' value trend to satisfy comparator '{}'. Initial value was {}.",
            self.prefixed(pv),
            trend.comparator(),
            format_value(Some(&initial))
        );
        self.check(
            pv,
            ValueSource::Poll,
            expectation,
            Some(Duration::ZERO),
            |value| trend.holds(value, &initial),
        )
    }

    /// The PV's value grows over `wait`.
    pub fn assert_value_is_increasing(&self, pv: &str, wait: Duration) -> AssertResult<()> {
        self.assert_value_over_time(pv, wait, Trend::Increasing)
    }

    /// The PV's value falls over `wait`.
    pub fn assert_value_is_decreasing(&self, pv: &str, wait: Duration) -> AssertResult<()> {
        self.assert_value_over_time(pv, wait, Trend::Decreasing)
    }

    /// The PV's value is the same after `wait`.
    pub fn assert_value_is_unchanged(&self, pv: &str, wait: Duration) -> AssertResult<()> {
        self.assert_value_over_time(pv, wait, Trend::Unchanged)
    }

    // =========================================================================
    // Monitor-based assertions
    // =========================================================================

    fn monitor(&self, pv: &str) -> AssertResult<MonitorCapture> {
        Ok(MonitorCapture::subscribe(
            Arc::clone(&self.access),
            self.prefixed(pv),
        )?)
    }

    /// Assert that a monitor on the PV delivers `expected`.
    ///
    /// Only pushed values count: a value readable by a direct get but never
    /// posted as a monitor update fails this assertion.
    pub fn assert_monitor_equals(
        &self,
        pv: &str,
        expected: impl Into<PvValue>,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        let capture = self.monitor(pv)?;
        self.equals_from(
            pv,
            ValueSource::Monitor(&capture),
            expected.into(),
            options.into(),
        )
    }

    /// Assert that a monitor on the PV delivers a value within `tolerance`
    /// of `expected`.
    pub fn assert_monitor_is_number(
        &self,
        pv: &str,
        expected: f64,
        tolerance: f64,
        options: impl Into<AssertOptions>,
    ) -> AssertResult<()> {
        let capture = self.monitor(pv)?;
        self.number_from(
            pv,
            ValueSource::Monitor(&capture),
            expected,
            tolerance,
            options.into(),
        )
    }
}

/// Guard holding a record in simulated alarm.
///
/// Dropping it writes `NO_ALARM` back and waits for the alarm to clear; a
/// failure there is logged, since `drop` cannot report it.
pub struct SimulatedAlarm<'a> {
    ca: &'a ChannelAccess,
    pv: String,
    active: bool,
}

impl SimulatedAlarm<'_> {
    /// Restore `NO_ALARM` now and report whether that worked.
    pub fn clear(mut self) -> AssertResult<()> {
        self.active = false;
        self.ca
            .set_and_check_simulated_alarm(&self.pv, AlarmSeverity::NoAlarm)
    }
}

impl Drop for SimulatedAlarm<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = self
            .ca
            .set_and_check_simulated_alarm(&self.pv, AlarmSeverity::NoAlarm)
        {
            warn!(pv = %self.ca.prefixed(&self.pv), error = %err, "failed to clear simulated alarm");
        }
    }
}

/// Unreachable after the whole budget is `NeverReachable`; anything else
/// passes through unchanged.
fn access_failure(pv: String, timeout: Duration, err: AccessError) -> AssertError {
    if err.is_retryable() {
        AssertError::NeverReachable {
            pv,
            timeout,
            source: err,
        }
    } else {
        AssertError::Access(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPvServer;
    use serial_test::serial;
    use tracing_test::traced_test;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            prefix: "TE:NDW:".to_string(),
            default_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(20),
            settle_after_put: Duration::ZERO,
            absence_timeout: Duration::from_millis(50),
            put_existence_timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn setup() -> (Arc<MockPvServer>, ChannelAccess) {
        let server = Arc::new(MockPvServer::new());
        let ca = ChannelAccess::new(server.clone(), &fast_config());
        (server, ca)
    }

    #[test]
    fn test_prefixing() {
        let (_, ca) = setup();
        assert_eq!(ca.prefixed("TEMP"), "TE:NDW:TEMP");
        let ca = ca.with_device_prefix("KEPCO_01");
        assert_eq!(ca.prefixed("VOLTAGE"), "TE:NDW:KEPCO_01:VOLTAGE");
    }

    #[test]
    fn test_equals_passes_and_fails_with_diagnostic() {
        let (server, ca) = setup();
        server.insert("TE:NDW:MODE", "VOLTAGE");
        ca.assert_equals("MODE", "VOLTAGE", AssertOptions::default())
            .unwrap();

        let err = ca
            .assert_equals("MODE", "CURRENT", Duration::from_millis(40))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected PV 'TE:NDW:MODE' to have value 'CURRENT'.\nFinal PV value was 'VOLTAGE'"
        );
    }

    #[test]
    fn test_custom_message_keeps_final_value() {
        let (server, ca) = setup();
        server.insert("TE:NDW:MODE", "VOLTAGE");
        let err = ca
            .assert_equals(
                "MODE",
                "CURRENT",
                AssertOptions::within(Duration::ZERO).with_message("mode did not switch"),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "mode did not switch\nFinal PV value was 'VOLTAGE'"
        );
    }

    #[test]
    fn test_not_equals() {
        let (server, ca) = setup();
        server.insert("TE:NDW:STATE", "IDLE");
        ca.assert_not_equals("STATE", "RUNNING", AssertOptions::default())
            .unwrap();
        assert!(ca
            .assert_not_equals("STATE", "IDLE", Duration::ZERO)
            .unwrap_err()
            .is_assertion_failure());
    }

    #[test]
    fn test_number_with_tolerance() {
        let (server, ca) = setup();
        server.insert("TE:NDW:TEMP", 10.04);
        ca.assert_is_number("TEMP", 10.0, 0.05, AssertOptions::default())
            .unwrap();
        ca.assert_is_not_number("TEMP", 11.0, 0.5, AssertOptions::default())
            .unwrap();
        let err = ca
            .assert_is_number("TEMP", 10.0, 0.0, Duration::ZERO)
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Expected PV 'TE:NDW:TEMP' value to be equal to 10.0 (tolerance: 0.0)"));
    }

    #[test]
    fn test_non_numeric_value_is_not_a_number() {
        let (server, ca) = setup();
        server.insert("TE:NDW:TEMP", "OFFLINE");
        assert!(ca
            .assert_is_number("TEMP", 0.0, 1e9, Duration::ZERO)
            .is_err());
        ca.assert_is_not_number("TEMP", 0.0, 1e9, Duration::ZERO)
            .unwrap();
    }

    #[test]
    fn test_one_of() {
        let (server, ca) = setup();
        server.insert("TE:NDW:STATUS", "ON");
        ca.assert_one_of("STATUS", ["ON", "OFF"], AssertOptions::default())
            .unwrap();
        let err = ca
            .assert_one_of("STATUS", ["FAULT"], Duration::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("to be in ['FAULT']"));
    }

    #[test]
    fn test_integer_in_range() {
        let (server, ca) = setup();
        server.insert("TE:NDW:X", "2");
        ca.assert_integer_in_range("X", 0, 3, AssertOptions::default())
            .unwrap();
        server.set("TE:NDW:X", "4.5");
        assert!(ca.assert_integer_in_range("X", 0, 3, Duration::ZERO).is_err());
        server.set("TE:NDW:X", "-1");
        assert!(ca.assert_integer_in_range("X", 0, 3, Duration::ZERO).is_err());
    }

    #[test]
    fn test_generic_condition() {
        let (server, ca) = setup();
        server.insert("TE:NDW:IDN", "KEPCO, BIT 4886 100-2 123456 1.8-");
        ca.assert_that(
            "IDN",
            "starts with KEPCO",
            |value| value.as_str().is_some_and(|s| s.starts_with("KEPCO")),
            AssertOptions::default(),
        )
        .unwrap();
        let err = ca
            .assert_that("IDN", "is empty", |value| value.as_str() == Some(""), Duration::ZERO)
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Expected condition 'is empty' to hold when reading PV 'TE:NDW:IDN'."));
    }

    #[test]
    fn test_existence() {
        let (server, ca) = setup();
        server.insert("TE:NDW:TEMP", 0.0);
        ca.assert_exists("TEMP", None).unwrap();
        ca.assert_does_not_exist("GONE", None).unwrap();
        assert!(matches!(
            ca.assert_exists("GONE", Some(Duration::ZERO)),
            Err(AssertError::Missing(pv)) if pv == "TE:NDW:GONE"
        ));
        assert!(matches!(
            ca.assert_does_not_exist("TEMP", None),
            Err(AssertError::Present(_))
        ));
    }

    #[test]
    fn test_alarm_assertions() {
        let (server, ca) = setup();
        server.insert("TE:NDW:TEMP", 0.0);
        ca.assert_alarm_is("TEMP", AlarmSeverity::NoAlarm, AssertOptions::default())
            .unwrap();
        server.set_alarm("TE:NDW:TEMP", AlarmSeverity::Minor, "HIGH");
        ca.assert_alarm_is("TEMP", AlarmSeverity::Minor, AssertOptions::default())
            .unwrap();
        ca.assert_alarm_is_not("TEMP", AlarmSeverity::Major, AssertOptions::default())
            .unwrap();
    }

    #[test]
    fn test_write_requires_existing_pv() {
        let (server, ca) = setup();
        let err = ca.set_pv_value("NOPE:SP", 1).unwrap_err();
        assert!(matches!(err, AssertError::Missing(_)));
        assert!(server.writes().is_empty());
    }

    #[test]
    fn test_process_then_assert() {
        let (server, ca) = setup();
        server.insert("TE:NDW:FIRMWARE", "1.8");
        ca.assert_after_processing_is("FIRMWARE", "1.8", AssertOptions::default())
            .unwrap();
        assert_eq!(server.process_count("TE:NDW:FIRMWARE"), 1);
    }

    #[test]
    fn test_simulated_alarm_guard_restores_on_drop() {
        let (server, ca) = setup();
        server.insert("TE:NDW:TEMP", 0.0);
        {
            let _alarm = ca.simulate_alarm("TEMP", AlarmSeverity::Major).unwrap();
            assert_eq!(
                ca.get_pv_value("TEMP.SEVR").unwrap(),
                PvValue::from("MAJOR")
            );
        }
        assert_eq!(
            ca.get_pv_value("TEMP.SEVR").unwrap(),
            PvValue::from("NO_ALARM")
        );
    }

    #[test]
    fn test_simulated_alarm_explicit_clear() {
        let (server, ca) = setup();
        server.insert("TE:NDW:TEMP", 0.0);
        let alarm = ca.simulate_alarm("TEMP", AlarmSeverity::Invalid).unwrap();
        alarm.clear().unwrap();
        assert_eq!(
            server.writes().last(),
            Some(&("TE:NDW:TEMP.SIMS".to_string(), PvValue::from("NO_ALARM")))
        );
    }

    #[test]
    fn test_trend_comparators() {
        assert!(Trend::Increasing.holds(&PvValue::Int(2), &PvValue::Int(1)));
        assert!(!Trend::Increasing.holds(&PvValue::Int(1), &PvValue::Int(1)));
        assert!(Trend::Decreasing.holds(&PvValue::Float(0.5), &PvValue::Int(1)));
        assert!(Trend::Unchanged.holds(&PvValue::Float(1.0), &PvValue::Int(1)));
        assert!(!Trend::Increasing.holds(&PvValue::from("b"), &PvValue::Int(1)));
    }

    #[test]
    fn test_monitor_assertion_ignores_silent_updates() {
        let (server, ca) = setup();
        server.insert("TE:NDW:COUNT", 0);
        server.set_silently("TE:NDW:COUNT", 7);
        ca.assert_equals("COUNT", 7, AssertOptions::default()).unwrap();
        let err = ca
            .assert_monitor_equals("COUNT", 7, Duration::from_millis(40))
            .unwrap_err();
        assert!(err.to_string().ends_with("Final PV value was None"));
        assert_eq!(server.subscription_count(), 0);
    }

    #[test]
    #[traced_test]
    fn test_writes_and_alarm_simulation_are_logged() {
        let (server, ca) = setup();
        server.insert("TE:NDW:TEMP", 1.0);
        ca.set_pv_value("TEMP", 2.0).unwrap();
        drop(ca.simulate_alarm("TEMP", AlarmSeverity::Minor).unwrap());

        assert!(logs_contain("TE:NDW:TEMP"));
        assert!(logs_contain("simulating alarm"));
        assert!(!logs_contain("failed to clear simulated alarm"));
    }

    #[test]
    fn test_trend_on_unreachable_pv_never_reachable() {
        let (server, ca) = setup();
        server.insert_unreachable_for("TE:NDW:SPEED", 1.0, Duration::from_secs(60));

        let err = ca
            .assert_value_is_increasing("SPEED", Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            AssertError::NeverReachable { ref pv, .. } if pv == "TE:NDW:SPEED"
        ));
    }

    #[test]
    #[serial]
    fn test_from_environment_reads_testing_prefix() {
        std::env::set_var("testing_prefix", "TE:ENV");
        let ca = ChannelAccess::from_environment(Arc::new(MockPvServer::new()));
        std::env::remove_var("testing_prefix");

        let ca = ca.unwrap();
        assert_eq!(ca.prefix(), "TE:ENV:");
        assert_eq!(ca.prefixed("TEMP"), "TE:ENV:TEMP");
    }
}
