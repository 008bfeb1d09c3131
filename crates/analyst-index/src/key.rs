#![forbid(unsafe_code)]

use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A grouping key produced by a dimension's key function.
///
/// Keys are totally ordered so groups can be listed in a stable, native order:
/// `Null < Boolean < Number < Text`, numbers compared numerically.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Null,
    Boolean(bool),
    Number(OrderedFloat<f64>),
    Text(Arc<str>),
}

impl Key {
    pub fn is_null(&self) -> bool {
        matches!(self, Key::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(n.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Text(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Null => 0,
            Key::Boolean(_) => 1,
            Key::Number(_) => 2,
            Key::Text(_) => 3,
        }
    }
}

pub fn cmp_key(a: &Key, b: &Key) -> Ordering {
    match (a, b) {
        (Key::Boolean(a), Key::Boolean(b)) => a.cmp(b),
        (Key::Number(a), Key::Number(b)) => a.cmp(b),
        (Key::Text(a), Key::Text(b)) => a.as_ref().cmp(b.as_ref()),
        _ => a.rank().cmp(&b.rank()),
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_key(self, other)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Null => f.write_str("null"),
            Key::Boolean(b) => write!(f, "{b}"),
            Key::Number(n) => write!(f, "{}", n.0),
            Key::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Key {
    fn from(value: f64) -> Self {
        Key::Number(OrderedFloat(value))
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Number(OrderedFloat(value as f64))
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Number(OrderedFloat(value as f64))
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Key::Boolean(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(Arc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(Arc::from(value))
    }
}
