//! Field resolution: turning a logical field into an accessor over rows.

use crate::value::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type AccessorFn = Rc<dyn Fn(&Row) -> Value>;

/// A field a reducer or dimension reads from every row.
///
/// A name starting with `/` is a pointer: `/<member><json-pointer>`, e.g. `/meta/tags/0` reads
/// member `meta` and then applies the JSON pointer `/tags/0` to it.
#[derive(Clone)]
pub enum Field {
    Name(String),
    Custom { id: String, accessor: AccessorFn },
}

impl Field {
    pub fn name(name: impl Into<String>) -> Self {
        Field::Name(name.into())
    }

    /// A computed field. `id` identifies it for dimension caching and reducer reuse, so two
    /// custom fields with the same id must compute the same thing.
    pub fn custom(id: impl Into<String>, accessor: impl Fn(&Row) -> Value + 'static) -> Self {
        Field::Custom {
            id: id.into(),
            accessor: Rc::new(accessor),
        }
    }

    pub fn id(&self) -> FieldId {
        match self {
            Field::Name(name) => FieldId::parse(name),
            Field::Custom { id, .. } => FieldId::Custom(id.clone()),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Field::Custom { id, .. } => f.debug_struct("Custom").field("id", id).finish(),
        }
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Name(value.to_string())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field::Name(value)
    }
}

impl From<&Field> for Field {
    fn from(value: &Field) -> Self {
        value.clone()
    }
}

/// Structured identity of a [`Field`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    Name(String),
    Pointer { member: String, pointer: String },
    Custom(String),
}

impl FieldId {
    fn parse(name: &str) -> Self {
        let Some(path) = name.strip_prefix('/') else {
            return FieldId::Name(name.to_string());
        };
        match path.find('/') {
            Some(split) => FieldId::Pointer {
                member: path[..split].to_string(),
                pointer: path[split..].to_string(),
            },
            None => FieldId::Pointer {
                member: path.to_string(),
                pointer: String::new(),
            },
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldId::Name(name) => f.write_str(name),
            FieldId::Pointer { member, pointer } => write!(f, "/{member}{pointer}"),
            FieldId::Custom(id) => write!(f, "custom:{id}"),
        }
    }
}

/// Field name to column position, for datasets made of positional (array) rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(HashMap<String, usize>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, position: usize) -> Option<usize> {
        self.0.insert(name.into(), position)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, usize)> for FieldMap {
    fn from_iter<T: IntoIterator<Item = (S, usize)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// A resolved field. Reading never fails: anything unresolvable is `null`.
#[derive(Clone)]
pub enum Accessor {
    Member(String),
    Position(usize),
    Nested { base: Box<Accessor>, pointer: String },
    Custom(AccessorFn),
}

impl Accessor {
    pub fn get(&self, row: &Row) -> Value {
        match self {
            Accessor::Member(name) => row.get(name.as_str()).cloned().unwrap_or(Value::Null),
            Accessor::Position(position) => row.get(*position).cloned().unwrap_or(Value::Null),
            Accessor::Nested { base, pointer } => match base.get(row) {
                value @ (Value::Object(_) | Value::Array(_)) => {
                    value.pointer(pointer).cloned().unwrap_or(Value::Null)
                }
                value => value,
            },
            Accessor::Custom(f) => f(row),
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Member(name) => f.debug_tuple("Member").field(name).finish(),
            Accessor::Position(position) => f.debug_tuple("Position").field(position).finish(),
            Accessor::Nested { base, pointer } => f
                .debug_struct("Nested")
                .field("base", base)
                .field("pointer", pointer)
                .finish(),
            Accessor::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Resolves fields against the dataset's row shape.
#[derive(Clone, Debug, Default)]
pub struct FieldResolver {
    map: FieldMap,
}

impl FieldResolver {
    pub fn new(map: FieldMap) -> Self {
        Self { map }
    }

    pub fn map(&self) -> &FieldMap {
        &self.map
    }

    pub fn set_map(&mut self, map: FieldMap) {
        self.map = map;
    }

    pub fn resolve(&self, field: &Field) -> Accessor {
        match field {
            Field::Custom { accessor, .. } => Accessor::Custom(accessor.clone()),
            Field::Name(_) => match field.id() {
                FieldId::Pointer { member, pointer } => Accessor::Nested {
                    base: Box::new(self.member(&member)),
                    pointer,
                },
                FieldId::Name(name) | FieldId::Custom(name) => self.member(&name),
            },
        }
    }

    fn member(&self, name: &str) -> Accessor {
        match self.map.position(name) {
            Some(position) => Accessor::Position(position),
            None => Accessor::Member(name.to_string()),
        }
    }
}
