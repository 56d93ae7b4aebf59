//! Alarm severities and the record field suffixes that expose them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::PvValue;

/// Field holding a record's alarm severity, read as its state string.
pub const SEVERITY_FIELD: &str = "SEVR";
/// Field that forces a simulated alarm severity onto a record.
pub const SIMULATED_SEVERITY_FIELD: &str = "SIMS";
/// Field that processes a record once when written.
pub const PROCESS_FIELD: &str = "PROC";

/// Name of the `field` sub-endpoint of `pv`, e.g. `TEMP.SEVR`.
pub fn field_of(pv: &str, field: &str) -> String {
    format!("{pv}.{field}")
}

/// Alarm severity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmSeverity {
    /// No alarm.
    #[default]
    NoAlarm,
    /// Minor alarm.
    Minor,
    /// Major alarm.
    Major,
    /// Invalid alarm, e.g. a calc record that could not evaluate.
    Invalid,
    /// The record has been disabled.
    Disable,
}

impl AlarmSeverity {
    /// All severities, in increasing order.
    pub const ALL: [AlarmSeverity; 5] = [
        AlarmSeverity::NoAlarm,
        AlarmSeverity::Minor,
        AlarmSeverity::Major,
        AlarmSeverity::Invalid,
        AlarmSeverity::Disable,
    ];

    /// The state string the control system reports for this severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmSeverity::NoAlarm => "NO_ALARM",
            AlarmSeverity::Minor => "MINOR",
            AlarmSeverity::Major => "MAJOR",
            AlarmSeverity::Invalid => "INVALID",
            AlarmSeverity::Disable => "DISABLE",
        }
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        AlarmSeverity::ALL
            .into_iter()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("Unknown alarm severity '{s}'"))
    }
}

impl From<AlarmSeverity> for PvValue {
    fn from(severity: AlarmSeverity) -> Self {
        PvValue::Text(severity.as_str().to_string())
    }
}
