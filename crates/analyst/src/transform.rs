//! Post-fold transforms and the pipeline that turns intermediate fields into a metric's output.

use crate::error::{AnalystError, AnalystResult};
use crate::field::{Accessor, Field, FieldResolver};
use crate::reducer::{IntermediateField, Intermediates};
use crate::value::cmp_values;
use serde_json::{Map, Value};
use std::fmt;
use std::rc::Rc;

/// A pure `value -> value` step.
#[derive(Clone)]
pub struct Transform(Rc<dyn Fn(Value) -> Value>);

impl Transform {
    pub fn new(f: impl Fn(Value) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn apply(&self, value: Value) -> Value {
        (self.0)(value)
    }

    /// Stable ascending sort of an array. Non-arrays pass through.
    pub fn order(key: impl Into<SortKey>) -> Self {
        let key = key.into();
        Self::new(move |value| match value {
            Value::Array(items) => Value::Array(key.sort(items)),
            other => other,
        })
    }

    /// Ascending sort, then reversal: equal keys end up in reverse of their original order.
    pub fn order_desc(key: impl Into<SortKey>) -> Self {
        let key = key.into();
        Self::new(move |value| match value {
            Value::Array(items) => {
                let mut items = key.sort(items);
                items.reverse();
                Value::Array(items)
            }
            other => other,
        })
    }

    pub fn reverse() -> Self {
        Self::new(|value| match value {
            Value::Array(mut items) => {
                items.reverse();
                Value::Array(items)
            }
            other => other,
        })
    }

    /// Keep the first `n` elements of an array.
    pub fn limit(n: usize) -> Self {
        Self::new(move |value| match value {
            Value::Array(mut items) => {
                items.truncate(n);
                Value::Array(items)
            }
            other => other,
        })
    }

    /// Read `field` from an object, or from every element of an array.
    pub fn extract(field: impl Into<Field>) -> Self {
        let accessor = FieldResolver::default().resolve(&field.into());
        Self::new(move |value| extract(&accessor, value))
    }
}

fn extract(accessor: &Accessor, value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| extract(accessor, item))
                .collect(),
        ),
        object @ Value::Object(_) => accessor.get(&object),
        _ => Value::Null,
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform(..)")
    }
}

impl<F> From<F> for Transform
where
    F: Fn(Value) -> Value + 'static,
{
    fn from(f: F) -> Self {
        Self::new(f)
    }
}

/// What array elements are sorted by.
#[derive(Clone)]
pub enum SortKey {
    Field(Accessor),
    Function(Rc<dyn Fn(&Value) -> Value>),
}

impl SortKey {
    pub fn function(f: impl Fn(&Value) -> Value + 'static) -> Self {
        SortKey::Function(Rc::new(f))
    }

    fn key(&self, item: &Value) -> Value {
        match self {
            SortKey::Field(accessor) => accessor.get(item),
            SortKey::Function(f) => f(item),
        }
    }

    fn sort(&self, items: Vec<Value>) -> Vec<Value> {
        let mut keyed: Vec<(Value, Value)> =
            items.into_iter().map(|item| (self.key(&item), item)).collect();
        keyed.sort_by(|(a, _), (b, _)| cmp_values(a, b));
        keyed.into_iter().map(|(_, item)| item).collect()
    }
}

impl From<&str> for SortKey {
    fn from(value: &str) -> Self {
        SortKey::Field(FieldResolver::default().resolve(&value.into()))
    }
}

impl From<Field> for SortKey {
    fn from(value: Field) -> Self {
        SortKey::Field(FieldResolver::default().resolve(&value))
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Field(accessor) => f.debug_tuple("Field").field(accessor).finish(),
            SortKey::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Alias table plus the transforms applied after every fold.
///
/// Stages run in a fixed order: derived values (already present in the expanded intermediates),
/// alias copies, per-alias transforms, projection onto the declared aliases, then `combine` and
/// whatever was chained after it. An alias of `None` is the anonymous reducer, whose value is the
/// whole output.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    aliases: Vec<(Option<String>, IntermediateField)>,
    field_transforms: Vec<(Option<String>, Transform)>,
    combine: Option<Transform>,
    after_combine: Vec<Transform>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_anonymous(&self) -> bool {
        self.aliases.iter().any(|(alias, _)| alias.is_none())
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> + '_ {
        self.aliases.iter().filter_map(|(alias, _)| alias.as_deref())
    }

    /// Whether a reducer may be declared under `alias`, with or without trailing transforms.
    pub fn check_alias(&self, alias: Option<&str>, with_transforms: bool) -> AnalystResult<()> {
        if self.has_anonymous() {
            return Err(AnalystError::MustBeAliased);
        }
        match alias {
            None if !self.aliases.is_empty() => Err(AnalystError::MustBeAliased),
            None if self.combine.is_some() => Err(AnalystError::CombineRequiresAliases),
            Some(name) if self.aliases().any(|a| a == name) => {
                Err(AnalystError::DuplicateAlias(name.to_string()))
            }
            Some(_) if with_transforms && self.combine.is_some() => {
                Err(AnalystError::CombineWithFieldTransforms)
            }
            _ => Ok(()),
        }
    }

    /// Record an alias already validated by [`Pipeline::check_alias`].
    pub fn declare(&mut self, alias: Option<String>, field: IntermediateField) {
        self.aliases.push((alias, field));
    }

    pub fn transform(
        &mut self,
        alias: Option<&str>,
        transforms: impl IntoIterator<Item = Transform>,
    ) -> AnalystResult<()> {
        match alias {
            Some(name) => {
                if !self.aliases().any(|a| a == name) {
                    return Err(AnalystError::UnknownAlias(name.to_string()));
                }
                if self.combine.is_some() {
                    return Err(AnalystError::CombineWithFieldTransforms);
                }
                let target = Some(name.to_string());
                self.field_transforms
                    .extend(transforms.into_iter().map(|t| (target.clone(), t)));
            }
            None if self.combine.is_some() => self.after_combine.extend(transforms),
            None if self.has_anonymous() => self
                .field_transforms
                .extend(transforms.into_iter().map(|t| (None, t))),
            None => return Err(AnalystError::AliasRequired),
        }
        Ok(())
    }

    pub fn combine(&mut self, transform: Transform) -> AnalystResult<()> {
        if self.has_anonymous() {
            return Err(AnalystError::CombineRequiresAliases);
        }
        if self.combine.is_some() {
            return Err(AnalystError::CombineAlreadySet);
        }
        if !self.field_transforms.is_empty() {
            return Err(AnalystError::CombineWithFieldTransforms);
        }
        self.combine = Some(transform);
        Ok(())
    }

    pub fn run(&self, intermediates: &Intermediates) -> Value {
        let mut outputs: Vec<(Option<&str>, Value)> = self
            .aliases
            .iter()
            .map(|(alias, field)| {
                let value = intermediates.get(field).cloned().unwrap_or(Value::Null);
                (alias.as_deref(), value)
            })
            .collect();

        for (target, transform) in &self.field_transforms {
            if let Some((_, value)) = outputs
                .iter_mut()
                .find(|(alias, _)| *alias == target.as_deref())
            {
                *value = transform.apply(value.take());
            }
        }

        let anonymous = matches!(outputs.as_slice(), [(None, _)]);
        let mut output = if anonymous {
            outputs.pop().map_or(Value::Null, |(_, value)| value)
        } else {
            Value::Object(
                outputs
                    .into_iter()
                    .filter_map(|(alias, value)| Some((alias?.to_string(), value)))
                    .collect::<Map<String, Value>>(),
            )
        };

        if let Some(combine) = &self.combine {
            output = combine.apply(output);
            for transform in &self.after_combine {
                output = transform.apply(output);
            }
        }
        output
    }
}
