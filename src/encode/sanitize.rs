//! Value sanitisers applied at the encoder boundary.
//!
//! The feed is permissive about types: altitudes may be the string
//! `"ground"`, flags arrive as `0`/`1` or booleans, and strings may be
//! blank padding. Every value entering a Parquet column passes through one
//! of these.

use serde_json::Value;

/// Numeric sanitiser: `None` for null, `"ground"`, or anything that does
/// not survive conversion to a finite number.
pub fn safe_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("ground") {
                None
            } else {
                s.parse::<f64>().ok().filter(|v| v.is_finite())
            }
        }
        _ => None,
    }
}

/// String sanitiser: `None` for null or empty-after-trim.
pub fn safe_string(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Boolean sanitiser: `None` for null; `true` iff the value is `1` or `true`.
pub fn safe_boolean(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_i64() == Some(1)),
        _ => Some(false),
    }
}

/// Finite-or-nothing filter for fields the feed already types as numbers.
pub fn safe_f64(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Int32 column conversion, truncating toward zero.
pub fn safe_i32(value: Option<f64>) -> Option<i32> {
    safe_f64(value).map(|v| v as i32)
}
