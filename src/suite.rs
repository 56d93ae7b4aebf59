//! Data-driven device test suites.
//!
//! Many devices are tested the same way: push an input into the device,
//! then check one status PV. A [`DeviceSuite`] captures the parts that vary
//! between devices (which PV to read, which PV carries the alarm, how an
//! input reaches the device) and runs a table of [`SuiteCase`]s through
//! them. Tables can be written in code or loaded from TOML:
//!
//! ```toml
//! [[case]]
//! name = "voltage_mid_range"
//! input = 1.2
//! expect = { kind = "number", value = 1.2, tolerance = 0.01 }
//!
//! [[case]]
//! name = "over_range_alarms"
//! input = 500.0
//! expect = { kind = "alarm", severity = "MAJOR" }
//! timeout = "10s"
//! ```

use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::alarm::AlarmSeverity;
use crate::fixture::TestContext;
use crate::value::PvValue;

/// Failure to load a case table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("Invalid TOML case table: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid JSON case table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Duplicate case name: '{0}'")]
    DuplicateCase(String),
}

/// What the status PV must show after a case's input is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    /// Exact value.
    Equals {
        /// Expected value.
        value: PvValue,
    },
    /// Numeric value within a tolerance.
    Number {
        /// Expected value.
        value: f64,
        /// Allowed deviation.
        #[serde(default)]
        tolerance: f64,
    },
    /// Any of several values.
    OneOf {
        /// Accepted values.
        values: Vec<PvValue>,
    },
    /// Integer between two bounds, inclusive.
    IntegerInRange {
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },
    /// Alarm severity of the suite's alarm PV.
    Alarm {
        /// Expected severity.
        severity: AlarmSeverity,
    },
}

/// One row of a device test table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteCase {
    /// Case name, unique within a table.
    pub name: String,
    /// Value handed to the suite's setter.
    pub input: PvValue,
    /// Check made afterwards.
    pub expect: Expectation,
    /// Budget for the check; the engine default when absent.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl SuiteCase {
    /// Case checked with the default timeout.
    pub fn new(name: impl Into<String>, input: impl Into<PvValue>, expect: Expectation) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            expect,
            timeout: None,
        }
    }

    /// Override the timeout.
    pub fn within(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Deserialize)]
struct CaseTable {
    #[serde(rename = "case", default)]
    cases: Vec<SuiteCase>,
}

fn check_unique(cases: Vec<SuiteCase>) -> Result<Vec<SuiteCase>, TableError> {
    let mut seen = std::collections::HashSet::new();
    for case in &cases {
        if !seen.insert(case.name.as_str()) {
            return Err(TableError::DuplicateCase(case.name.clone()));
        }
    }
    Ok(cases)
}

/// Parse a TOML table of `[[case]]` entries.
pub fn cases_from_toml(text: &str) -> Result<Vec<SuiteCase>, TableError> {
    let table: CaseTable = toml::from_str(text)?;
    check_unique(table.cases)
}

/// Parse a JSON array of cases.
pub fn cases_from_json(text: &str) -> Result<Vec<SuiteCase>, TableError> {
    let cases: Vec<SuiteCase> = serde_json::from_str(text)?;
    check_unique(cases)
}

type Setter = Box<dyn Fn(&TestContext, &PvValue) -> anyhow::Result<()> + Send + Sync>;

/// A family of device tests parameterised by status PV, alarm PV and setter.
pub struct DeviceSuite {
    name: String,
    status_pv: String,
    alarm_pv: Option<String>,
    setter: Setter,
}

impl std::fmt::Debug for DeviceSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSuite")
            .field("name", &self.name)
            .field("status_pv", &self.status_pv)
            .field("alarm_pv", &self.alarm_pv)
            .finish()
    }
}

impl DeviceSuite {
    /// Suite applying inputs through an arbitrary setter.
    pub fn new<F>(name: impl Into<String>, status_pv: impl Into<String>, setter: F) -> Self
    where
        F: Fn(&TestContext, &PvValue) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            status_pv: status_pv.into(),
            alarm_pv: None,
            setter: Box::new(setter),
        }
    }

    /// Suite applying inputs by writing a setpoint PV through the IOC.
    pub fn writing_setpoint(
        name: impl Into<String>,
        status_pv: impl Into<String>,
        setpoint_pv: impl Into<String>,
    ) -> Self {
        let setpoint_pv = setpoint_pv.into();
        Self::new(name, status_pv, move |ctx, value| {
            ctx.ca()
                .set_pv_value(&setpoint_pv, value)
                .with_context(|| format!("writing setpoint {setpoint_pv}"))
        })
    }

    /// Suite applying inputs to an emulator property, bypassing the IOC.
    pub fn through_backdoor(
        name: impl Into<String>,
        status_pv: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        let property = property.into();
        Self::new(name, status_pv, move |ctx, value| {
            ctx.backdoor()?.set_on_device(&property, value.clone())
        })
    }

    /// Check alarm expectations against this PV instead of the status PV.
    pub fn with_alarm_pv(mut self, pv: impl Into<String>) -> Self {
        self.alarm_pv = Some(pv.into());
        self
    }

    /// Suite name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every case, continuing past failures.
    pub fn run(&self, ctx: &TestContext, cases: &[SuiteCase]) -> SuiteReport {
        let results = cases
            .iter()
            .map(|case| {
                info!(suite = %self.name, case = %case.name, "running case");
                match self.run_case(ctx, case) {
                    Ok(()) => CaseResult {
                        name: case.name.clone(),
                        passed: true,
                        failure: None,
                    },
                    Err(err) => {
                        let failure = format!("{err:#}");
                        warn!(suite = %self.name, case = %case.name, error = %failure, "case failed");
                        CaseResult {
                            name: case.name.clone(),
                            passed: false,
                            failure: Some(failure),
                        }
                    }
                }
            })
            .collect();
        SuiteReport {
            suite: self.name.clone(),
            results,
        }
    }

    fn run_case(&self, ctx: &TestContext, case: &SuiteCase) -> anyhow::Result<()> {
        (self.setter)(ctx, &case.input)?;

        let ca = ctx.ca();
        let pv = self.status_pv.as_str();
        let timeout = case.timeout;
        match &case.expect {
            Expectation::Equals { value } => ca.assert_equals(pv, value, timeout)?,
            Expectation::Number { value, tolerance } => {
                ca.assert_is_number(pv, *value, *tolerance, timeout)?
            }
            Expectation::OneOf { values } => ca.assert_one_of(pv, values, timeout)?,
            Expectation::IntegerInRange { min, max } => {
                ca.assert_integer_in_range(pv, *min, *max, timeout)?
            }
            Expectation::Alarm { severity } => {
                let alarm_pv = self.alarm_pv.as_deref().unwrap_or(pv);
                ca.assert_alarm_is(alarm_pv, *severity, timeout)?
            }
        }
        Ok(())
    }
}

/// Result of one case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    /// Case name.
    pub name: String,
    /// Whether the case passed.
    pub passed: bool,
    /// Failure diagnostic, for failed cases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Results of one suite run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteReport {
    /// Suite name.
    pub suite: String,
    /// Per-case results, in table order.
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    /// Number of passing cases.
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|result| result.passed).count()
    }

    /// Failing cases.
    pub fn failures(&self) -> impl Iterator<Item = &CaseResult> {
        self.results.iter().filter(|result| !result.passed)
    }

    /// True when every case passed.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|result| result.passed)
    }

    /// Report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Turn a report with failures into an error listing them.
    pub fn into_result(self) -> anyhow::Result<()> {
        if self.is_success() {
            return Ok(());
        }
        let details: Vec<String> = self
            .failures()
            .map(|result| {
                format!(
                    "{}: {}",
                    result.name,
                    result.failure.as_deref().unwrap_or_default()
                )
            })
            .collect();
        bail!(
            "{} of {} cases failed in suite '{}':\n{}",
            details.len(),
            self.results.len(),
            self.suite,
            details.join("\n")
        )
    }
}
