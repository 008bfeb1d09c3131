//! Helpers over the JSON values rows and accumulators are made of.

use analyst_index::Key;
use serde_json::Value;
use std::cmp::Ordering;

/// A dataset record: a JSON object, or a positional array read through a
/// [`FieldMap`](crate::FieldMap).
pub type Row = Value;

/// Largest magnitude below which every integer is exactly representable as an `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Numeric contribution of a value to a sum.
///
/// `null`, non-numeric strings and containers count as `0`, booleans as `0`/`1`.
pub fn as_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Null | Value::Array(_) | Value::Object(_) => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

/// Canonical JSON form of a number: integral values become JSON integers.
pub fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

/// Group key for a value produced by a dimension accessor.
pub fn key_of(value: &Value) -> Key {
    match value {
        Value::Null => Key::Null,
        Value::Bool(b) => Key::Boolean(*b),
        Value::Number(n) => n.as_f64().map_or(Key::Null, Key::from),
        Value::String(s) => Key::from(s.as_str()),
        Value::Array(_) | Value::Object(_) => Key::from(value.to_string()),
    }
}

pub fn key_to_value(key: &Key) -> Value {
    match key {
        Key::Null => Value::Null,
        Key::Boolean(b) => Value::Bool(*b),
        Key::Number(n) => number(n.0),
        Key::Text(s) => Value::from(s.as_ref()),
    }
}

/// Orders values the way group keys are ordered.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    key_of(a).cmp(&key_of(b))
}

/// Map key under which a value is counted by a distinct accumulator.
pub(crate) fn distinct_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => number(f).to_string(),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}
