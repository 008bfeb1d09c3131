#![forbid(unsafe_code)]

use crate::key::Key;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

/// A predicate applied to a dimension's keys.
///
/// Rows whose key does not match are hidden from every group except the ones keyed by the
/// filtered dimension itself.
#[derive(Clone)]
pub enum Filter {
    /// Keep rows whose key equals the value.
    Exact(Key),
    /// Keep rows whose key is one of the values.
    In(BTreeSet<Key>),
    /// Keep rows whose key falls in `[lower, upper)`.
    Range { lower: Key, upper: Key },
    /// Keep rows for which the function returns `true`.
    Predicate(Rc<dyn Fn(&Key) -> bool>),
}

impl Filter {
    pub fn exact(key: impl Into<Key>) -> Self {
        Filter::Exact(key.into())
    }

    pub fn any_of<K: Into<Key>>(keys: impl IntoIterator<Item = K>) -> Self {
        Filter::In(keys.into_iter().map(Into::into).collect())
    }

    pub fn range(lower: impl Into<Key>, upper: impl Into<Key>) -> Self {
        Filter::Range {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    pub fn predicate(f: impl Fn(&Key) -> bool + 'static) -> Self {
        Filter::Predicate(Rc::new(f))
    }

    pub fn matches(&self, key: &Key) -> bool {
        match self {
            Filter::Exact(value) => key == value,
            Filter::In(values) => values.contains(key),
            Filter::Range { lower, upper } => lower <= key && key < upper,
            Filter::Predicate(f) => f(key),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Exact(key) => f.debug_tuple("Exact").field(key).finish(),
            Filter::In(keys) => f.debug_tuple("In").field(keys).finish(),
            Filter::Range { lower, upper } => f
                .debug_struct("Range")
                .field("lower", lower)
                .field("upper", upper)
                .finish(),
            Filter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Filter::Exact(a), Filter::Exact(b)) => a == b,
            (Filter::In(a), Filter::In(b)) => a == b,
            (
                Filter::Range { lower, upper },
                Filter::Range {
                    lower: other_lower,
                    upper: other_upper,
                },
            ) => lower == other_lower && upper == other_upper,
            (Filter::Predicate(a), Filter::Predicate(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
