//! Process-variable values and their diagnostic rendering.
//!
//! A [`PvValue`] is whatever a channel read hands back: an integer, a double,
//! a string (enum records read back as their state string) or a waveform.
//! Comparisons follow the loose rules test authors expect from the control
//! system: `5` equals `5.0`, and a string that spells a number can be coerced
//! to one.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A value read from, or written to, a process variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PvValue {
    /// Integer-typed record value.
    Int(i64),
    /// Floating point record value.
    Float(f64),
    /// String or enum-state value.
    Text(String),
    /// Waveform value.
    Array(Vec<PvValue>),
}

impl PvValue {
    /// Coerce to a float, the way a numeric comparison would.
    ///
    /// Text is trimmed then parsed; arrays never coerce.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PvValue::Int(i) => Some(*i as f64),
            PvValue::Float(f) => Some(*f),
            PvValue::Text(s) => s.trim().parse::<f64>().ok(),
            PvValue::Array(_) => None,
        }
    }

    /// Coerce to an integer.
    ///
    /// Finite floats truncate toward zero. Text must spell an integer:
    /// `"2"` coerces, `"4.5"` does not.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PvValue::Int(i) => Some(*i),
            PvValue::Float(f) => {
                let truncated = f.trunc();
                if truncated.is_finite()
                    && truncated >= i64::MIN as f64
                    && truncated <= i64::MAX as f64
                {
                    Some(truncated as i64)
                } else {
                    None
                }
            }
            PvValue::Text(s) => s.trim().parse::<i64>().ok(),
            PvValue::Array(_) => None,
        }
    }

    /// Borrow the text of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PvValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type tag used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            PvValue::Int(_) => "int",
            PvValue::Float(_) => "float",
            PvValue::Text(_) => "str",
            PvValue::Array(_) => "array",
        }
    }
}

impl PartialEq for PvValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PvValue::Int(a), PvValue::Int(b)) => a == b,
            (PvValue::Int(a), PvValue::Float(b)) | (PvValue::Float(b), PvValue::Int(a)) => {
                *a as f64 == *b
            }
            (PvValue::Float(a), PvValue::Float(b)) => a == b,
            (PvValue::Text(a), PvValue::Text(b)) => a == b,
            (PvValue::Array(a), PvValue::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for PvValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (PvValue::Int(a), PvValue::Int(b)) => a.partial_cmp(b),
            (PvValue::Int(_) | PvValue::Float(_), PvValue::Int(_) | PvValue::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (PvValue::Text(a), PvValue::Text(b)) => a.partial_cmp(b),
            (PvValue::Array(a), PvValue::Array(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvValue::Int(i) => write!(f, "{i}"),
            // Debug keeps the trailing ".0" so 5.0 and 5 read differently.
            PvValue::Float(x) => write!(f, "{x:?}"),
            PvValue::Text(s) => write!(f, "'{s}'"),
            PvValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Render a possibly-absent value for a failure diagnostic.
///
/// Never fails; an absent value (a monitor that has not fired yet) renders
/// as `None`.
pub fn format_value(value: Option<&PvValue>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "None".to_string(),
    }
}

/// Render a list of values, as used by membership diagnostics.
pub fn format_values(values: &[PvValue]) -> String {
    PvValue::Array(values.to_vec()).to_string()
}

impl From<i64> for PvValue {
    fn from(value: i64) -> Self {
        PvValue::Int(value)
    }
}

impl From<i32> for PvValue {
    fn from(value: i32) -> Self {
        PvValue::Int(i64::from(value))
    }
}

impl From<u32> for PvValue {
    fn from(value: u32) -> Self {
        PvValue::Int(i64::from(value))
    }
}

impl From<bool> for PvValue {
    fn from(value: bool) -> Self {
        PvValue::Int(i64::from(value))
    }
}

impl From<f64> for PvValue {
    fn from(value: f64) -> Self {
        PvValue::Float(value)
    }
}

impl From<&str> for PvValue {
    fn from(value: &str) -> Self {
        PvValue::Text(value.to_string())
    }
}

impl From<String> for PvValue {
    fn from(value: String) -> Self {
        PvValue::Text(value)
    }
}

impl<T: Into<PvValue>> From<Vec<T>> for PvValue {
    fn from(values: Vec<T>) -> Self {
        PvValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl From<&PvValue> for PvValue {
    fn from(value: &PvValue) -> Self {
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_crosses_int_and_float() {
        assert_eq!(PvValue::Int(5), PvValue::Float(5.0));
        assert_ne!(PvValue::Int(5), PvValue::Float(5.5));
        assert_ne!(PvValue::Int(5), PvValue::from("5"));
        assert_ne!(PvValue::Float(f64::NAN), PvValue::Float(f64::NAN));
    }

    #[test]
    fn test_float_coercion() {
        assert_eq!(PvValue::from(" 2.5 ").as_f64(), Some(2.5));
        assert_eq!(PvValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(PvValue::from("ON").as_f64(), None);
        assert_eq!(PvValue::from(vec![1, 2]).as_f64(), None);
    }

    #[test]
    fn test_integer_coercion() {
        assert_eq!(PvValue::from("2").as_i64(), Some(2));
        assert_eq!(PvValue::from("-1").as_i64(), Some(-1));
        assert_eq!(PvValue::from("4.5").as_i64(), None);
        assert_eq!(PvValue::Float(4.9).as_i64(), Some(4));
        assert_eq!(PvValue::Float(-4.9).as_i64(), Some(-4));
        assert_eq!(PvValue::Float(f64::INFINITY).as_i64(), None);
    }

    #[test]
    fn test_ordering() {
        assert!(PvValue::Int(3) > PvValue::Float(2.5));
        assert!(PvValue::from("b") > PvValue::from("a"));
        assert_eq!(PvValue::Int(1).partial_cmp(&PvValue::from("1")), None);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(None), "None");
        assert_eq!(format_value(Some(&PvValue::Int(5))), "5");
        assert_eq!(format_value(Some(&PvValue::Float(5.0))), "5.0");
        assert_eq!(format_value(Some(&PvValue::from("NO_ALARM"))), "'NO_ALARM'");
        assert_eq!(
            format_value(Some(&PvValue::from(vec![1.5, 2.0]))),
            "[1.5, 2.0]"
        );
        assert_eq!(format_values(&[PvValue::Int(1), "A".into()]), "[1, 'A']");
    }

    #[test]
    fn test_untagged_deserialisation_prefers_integers() {
        let values: Vec<PvValue> = serde_json::from_str(r#"[1, 1.5, "x", [2, 3]]"#).unwrap();
        assert!(matches!(values[0], PvValue::Int(1)));
        assert!(matches!(values[1], PvValue::Float(_)));
        assert_eq!(values[2].as_str(), Some("x"));
        assert_eq!(values[3], PvValue::from(vec![2, 3]));
    }
}
