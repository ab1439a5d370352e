//! Total field extractors.
//!
//! Each function maps any JSON value (or its absence) to a typed value and
//! never fails. Shape mismatches produce the type's zero value.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

/// Text rendered for a key that is absent from the event.
pub const MISSING_TEXT: &str = "null";

/// Textual form of a value: strings verbatim, everything else as JSON text.
#[must_use]
pub fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => MISSING_TEXT.to_string(),
    }
}

/// Decimal from a JSON number or numeric string; zero otherwise.
#[must_use]
pub fn decimal_or_zero(value: Option<&Value>) -> Decimal {
    decimal(value).unwrap_or(Decimal::ZERO)
}

/// Integer from an integral JSON number or integer string; zero otherwise.
#[must_use]
pub fn integer_or_zero(value: Option<&Value>) -> i64 {
    integer(value).unwrap_or(0)
}

/// Strict decimal extraction, `None` when the value is not numeric.
#[must_use]
pub fn decimal(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        // serde_json renders floats in shortest round-trip form, so going
        // through the text keeps "731.99" exact instead of the nearest f64.
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

/// Strict integer extraction, `None` when the value is not integral.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e18)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}
