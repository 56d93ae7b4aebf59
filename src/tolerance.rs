//! Numeric matching used by the number and range assertions.

use crate::value::PvValue;

/// True iff `observed` coerces to a number within `tolerance` of `expected`.
///
/// A value that cannot be coerced does not match. Tolerance is not
/// validated: a negative tolerance never matches.
pub fn within_tolerance(observed: &PvValue, expected: f64, tolerance: f64) -> bool {
    match observed.as_f64() {
        Some(value) => (value - expected).abs() <= tolerance,
        None => false,
    }
}

/// True iff `observed` coerces to an integer in `min..=max`.
pub fn integer_in_range(observed: &PvValue, min: i64, max: i64) -> bool {
    observed
        .as_i64()
        .is_some_and(|value| (min..=max).contains(&value))
}
