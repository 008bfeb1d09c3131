//! Incremental reducers and the registry that combines them into one composite fold.
//!
//! Every reducer owns one slot of the composite accumulator, addressed by an
//! [`IntermediateField`]. The composite fold applies each reducer to its own slot only, in
//! registration order. Values computed from several slots (averages, distinct counts, maxima) are
//! [`Derivation`]s, evaluated after the fold when the accumulator is expanded.

use crate::field::{Accessor, Field, FieldId, FieldResolver};
use crate::value::{as_number, distinct_key, key_of, number, Row};
use analyst_index::Fold;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

type Step = Rc<dyn Fn(&mut Value, &Row)>;
type Initial = Rc<dyn Fn() -> Value>;
type Finish = Rc<dyn Fn(&Value) -> Value>;

/// An `add`/`remove`/`initial` triple over one accumulator slot.
///
/// `remove` must undo `add` for the same row. An optional `finish` step turns the accumulator
/// into the reported value when it carries bookkeeping the output should not show.
#[derive(Clone)]
pub struct Reducer {
    add: Step,
    remove: Step,
    initial: Initial,
    finish: Option<Finish>,
}

impl Reducer {
    pub fn new(
        add: impl Fn(&mut Value, &Row) + 'static,
        remove: impl Fn(&mut Value, &Row) + 'static,
        initial: impl Fn() -> Value + 'static,
    ) -> Self {
        Self {
            add: Rc::new(add),
            remove: Rc::new(remove),
            initial: Rc::new(initial),
            finish: None,
        }
    }

    pub fn with_finish(mut self, finish: impl Fn(&Value) -> Value + 'static) -> Self {
        self.finish = Some(Rc::new(finish));
        self
    }

    pub fn count() -> Self {
        Self::new(
            |acc, _| *acc = number(as_number(acc) + 1.0),
            |acc, _| *acc = number(as_number(acc) - 1.0),
            || Value::from(0),
        )
    }

    pub fn sum(value: Accessor) -> Self {
        let remove_value = value.clone();
        Self::new(
            move |acc, row| *acc = number(as_number(acc) + as_number(&value.get(row))),
            move |acc, row| *acc = number(as_number(acc) - as_number(&remove_value.get(row))),
            || Value::from(0),
        )
    }

    /// Occurrence count per observed value. A value's entry is dropped when its count reaches
    /// zero; removing a value that was never added does nothing.
    pub fn distinct(value: Accessor) -> Self {
        let remove_value = value.clone();
        Self::new(
            move |acc, row| {
                let Value::Object(seen) = acc else { return };
                let entry = seen
                    .entry(distinct_key(&value.get(row)))
                    .or_insert_with(|| Value::from(0));
                *entry = number(as_number(entry) + 1.0);
            },
            move |acc, row| {
                let Value::Object(seen) = acc else { return };
                decrement_entry(seen, distinct_key(&remove_value.get(row)), 1.0);
            },
            || Value::Object(Map::new()),
        )
    }

    /// Sums the values of an object-valued field key by key. A key is dropped once no folded
    /// row contributes to it any more.
    pub fn sum_object(value: Accessor) -> Self {
        let remove_value = value.clone();
        Self::new(
            move |acc, row| {
                let (Value::Object(totals), Value::Object(inner)) = (acc, value.get(row)) else {
                    return;
                };
                for (key, amount) in inner {
                    let entry = totals.entry(key).or_insert_with(|| json!([0, 0]));
                    tally(entry, as_number(&amount), 1.0);
                }
            },
            move |acc, row| {
                let (Value::Object(totals), Value::Object(inner)) = (acc, remove_value.get(row))
                else {
                    return;
                };
                for (key, amount) in inner {
                    let Some(entry) = totals.get_mut(&key) else {
                        continue;
                    };
                    if tally(entry, -as_number(&amount), -1.0) <= 0.0 {
                        totals.remove(&key);
                    }
                }
            },
            || Value::Object(Map::new()),
        )
        .with_finish(|acc| match acc {
            Value::Object(totals) => Value::Object(
                totals
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.get(0).cloned().unwrap_or(Value::Null)))
                    .collect(),
            ),
            other => other.clone(),
        })
    }

    /// Sums a field holding `[{key, value}, ..]` pairs, key by key. Entries are found by key
    /// equality, not by position, and dropped once no folded row contributes to them.
    pub fn sum_array(value: Accessor) -> Self {
        let remove_value = value.clone();
        Self::new(
            move |acc, row| {
                let (Value::Array(totals), Value::Array(pairs)) = (acc, value.get(row)) else {
                    return;
                };
                for pair in &pairs {
                    let key = pair.get("key").cloned().unwrap_or(Value::Null);
                    let amount = as_number(pair.get("value").unwrap_or(&Value::Null));
                    let index = match position_of(totals, &key) {
                        Some(index) => index,
                        None => {
                            totals.push(json!({ "key": key, "value": [0, 0] }));
                            totals.len() - 1
                        }
                    };
                    if let Some(entry) = totals[index].get_mut("value") {
                        tally(entry, amount, 1.0);
                    }
                }
            },
            move |acc, row| {
                let (Value::Array(totals), Value::Array(pairs)) = (acc, remove_value.get(row))
                else {
                    return;
                };
                for pair in &pairs {
                    let key = pair.get("key").cloned().unwrap_or(Value::Null);
                    let Some(index) = position_of(totals, &key) else {
                        continue;
                    };
                    let amount = as_number(pair.get("value").unwrap_or(&Value::Null));
                    let contributors = totals[index]
                        .get_mut("value")
                        .map_or(0.0, |entry| tally(entry, -amount, -1.0));
                    if contributors <= 0.0 {
                        totals.remove(index);
                    }
                }
            },
            || Value::Array(Vec::new()),
        )
        .with_finish(|acc| match acc {
            Value::Array(totals) => Value::Array(
                totals
                    .iter()
                    .map(|entry| {
                        json!({
                            "key": entry["key"],
                            "value": entry["value"].get(0).cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect(),
            ),
            other => other.clone(),
        })
    }

    pub fn add(&self, acc: &mut Value, row: &Row) {
        (self.add)(acc, row)
    }

    pub fn remove(&self, acc: &mut Value, row: &Row) {
        (self.remove)(acc, row)
    }

    pub fn initial(&self) -> Value {
        (self.initial)()
    }

    /// The value reported for `acc`.
    pub fn finish(&self, acc: &Value) -> Value {
        match &self.finish {
            Some(finish) => finish(acc),
            None => acc.clone(),
        }
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reducer(..)")
    }
}

fn decrement_entry(map: &mut Map<String, Value>, key: String, amount: f64) {
    let Some(entry) = map.get_mut(&key) else {
        return;
    };
    let remaining = as_number(entry) - amount;
    if remaining == 0.0 {
        map.remove(&key);
    } else {
        *entry = number(remaining);
    }
}

/// Apply `amount` and a change in contributing rows to a `[total, rows]` entry. Returns the
/// remaining number of contributing rows.
fn tally(entry: &mut Value, amount: f64, rows: f64) -> f64 {
    let Value::Array(parts) = entry else {
        return 0.0;
    };
    let [total, contributors] = parts.as_mut_slice() else {
        return 0.0;
    };
    *total = number(as_number(total) + amount);
    *contributors = number(as_number(contributors) + rows);
    as_number(contributors)
}

fn position_of(pairs: &[Value], key: &Value) -> Option<usize> {
    let key = key_of(key);
    pairs
        .iter()
        .position(|pair| pair.get("key").map_or(false, |k| key_of(k) == key))
}

/// Identity of one slot of the composite accumulator, or of a derived value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IntermediateField {
    Count,
    Total(FieldId),
    /// `count: None` divides by the row count.
    Average {
        total: FieldId,
        count: Option<FieldId>,
    },
    Distincts(FieldId),
    DistinctCount(FieldId),
    Max(FieldId),
    SumObject(FieldId),
    SumArray(FieldId),
    Custom(String),
}

impl fmt::Display for IntermediateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntermediateField::Count => f.write_str("count"),
            IntermediateField::Total(field) => write!(f, "{field}.total"),
            IntermediateField::Average { total, count: None } => write!(f, "{total}.average"),
            IntermediateField::Average {
                total,
                count: Some(count),
            } => write!(f, "{total}/{count}.average"),
            IntermediateField::Distincts(field) => write!(f, "{field}.distincts"),
            IntermediateField::DistinctCount(field) => write!(f, "{field}.distinct_count"),
            IntermediateField::Max(field) => write!(f, "{field}.max"),
            IntermediateField::SumObject(field) => write!(f, "{field}.sum_object"),
            IntermediateField::SumArray(field) => write!(f, "{field}.sum_array"),
            IntermediateField::Custom(name) => f.write_str(name),
        }
    }
}

/// A value computed from other intermediate fields once the fold is done.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Derivation {
    /// `count != 0 ? total / count : 0`.
    Average {
        output: IntermediateField,
        total: IntermediateField,
        count: IntermediateField,
    },
    DistinctCount {
        output: IntermediateField,
        distincts: IntermediateField,
    },
    Max {
        output: IntermediateField,
        distincts: IntermediateField,
    },
}

impl Derivation {
    pub fn output(&self) -> &IntermediateField {
        match self {
            Derivation::Average { output, .. }
            | Derivation::DistinctCount { output, .. }
            | Derivation::Max { output, .. } => output,
        }
    }

    fn apply(&self, fields: &mut Intermediates) {
        let value = match self {
            Derivation::Average { total, count, .. } => {
                let count = fields.get(count).map_or(0.0, as_number);
                if count == 0.0 {
                    Value::from(0)
                } else {
                    number(fields.get(total).map_or(0.0, as_number) / count)
                }
            }
            Derivation::DistinctCount { distincts, .. } => match fields.get(distincts) {
                Some(Value::Object(seen)) => Value::from(seen.len()),
                _ => Value::from(0),
            },
            Derivation::Max { distincts, .. } => match fields.get(distincts) {
                Some(Value::Object(seen)) => {
                    let keys: Vec<&str> = seen.keys().map(String::as_str).collect();
                    largest(&keys)
                }
                _ => Value::Null,
            },
        };
        fields.insert(self.output().clone(), value);
    }
}

/// Numeric maximum when every key parses as a finite number, lexicographic maximum otherwise.
fn largest(keys: &[&str]) -> Value {
    let numeric: Option<Vec<f64>> = keys
        .iter()
        .map(|k| k.parse::<f64>().ok().filter(|n| n.is_finite()))
        .collect();
    match numeric {
        Some(values) => values
            .into_iter()
            .max_by(f64::total_cmp)
            .map_or(Value::Null, number),
        None => keys.iter().max().map_or(Value::Null, |k| Value::from(*k)),
    }
}

/// Intermediate field values after expansion, derived values included.
pub type Intermediates = HashMap<IntermediateField, Value>;

/// Collects reducers while a metric is being configured.
#[derive(Debug, Default)]
pub struct ReducerRegistry {
    slots: Vec<(IntermediateField, Reducer)>,
    derivations: Vec<Derivation>,
}

impl ReducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether a reducer slot or a derivation already produces `field`.
    pub fn contains(&self, field: &IntermediateField) -> bool {
        self.slots.iter().any(|(slot, _)| slot == field)
            || self.derivations.iter().any(|d| d.output() == field)
    }

    /// Register `reducer` under `field` unless the field is already produced.
    pub fn register(&mut self, field: IntermediateField, reducer: Reducer) -> IntermediateField {
        if !self.contains(&field) {
            self.slots.push((field.clone(), reducer));
        }
        field
    }

    fn derive(&mut self, derivation: Derivation) -> IntermediateField {
        let output = derivation.output().clone();
        if !self.contains(&output) {
            self.derivations.push(derivation);
        }
        output
    }

    pub fn count(&mut self) -> IntermediateField {
        self.register(IntermediateField::Count, Reducer::count())
    }

    pub fn sum(&mut self, field: &Field, resolver: &FieldResolver) -> IntermediateField {
        let id = IntermediateField::Total(field.id());
        if self.contains(&id) {
            return id;
        }
        self.register(id, Reducer::sum(resolver.resolve(field)))
    }

    pub fn average(&mut self, field: &Field, resolver: &FieldResolver) -> IntermediateField {
        let count = self.count();
        let total = self.sum(field, resolver);
        self.derive(Derivation::Average {
            output: IntermediateField::Average {
                total: field.id(),
                count: None,
            },
            total,
            count,
        })
    }

    pub fn weighted_average(
        &mut self,
        total: &Field,
        count: &Field,
        resolver: &FieldResolver,
    ) -> IntermediateField {
        let total_field = self.sum(total, resolver);
        let count_field = self.sum(count, resolver);
        self.derive(Derivation::Average {
            output: IntermediateField::Average {
                total: total.id(),
                count: Some(count.id()),
            },
            total: total_field,
            count: count_field,
        })
    }

    pub fn distinct(&mut self, field: &Field, resolver: &FieldResolver) -> IntermediateField {
        let id = IntermediateField::Distincts(field.id());
        if self.contains(&id) {
            return id;
        }
        self.register(id, Reducer::distinct(resolver.resolve(field)))
    }

    pub fn distinct_count(&mut self, field: &Field, resolver: &FieldResolver) -> IntermediateField {
        let distincts = self.distinct(field, resolver);
        self.derive(Derivation::DistinctCount {
            output: IntermediateField::DistinctCount(field.id()),
            distincts,
        })
    }

    pub fn max(&mut self, field: &Field, resolver: &FieldResolver) -> IntermediateField {
        let distincts = self.distinct(field, resolver);
        self.derive(Derivation::Max {
            output: IntermediateField::Max(field.id()),
            distincts,
        })
    }

    pub fn sum_object(&mut self, field: &Field, resolver: &FieldResolver) -> IntermediateField {
        let id = IntermediateField::SumObject(field.id());
        if self.contains(&id) {
            return id;
        }
        self.register(id, Reducer::sum_object(resolver.resolve(field)))
    }

    pub fn sum_array(&mut self, field: &Field, resolver: &FieldResolver) -> IntermediateField {
        let id = IntermediateField::SumArray(field.id());
        if self.contains(&id) {
            return id;
        }
        self.register(id, Reducer::sum_array(resolver.resolve(field)))
    }

    /// A caller-supplied reducer stored under `output`. Registering an existing output again
    /// keeps the first reducer.
    pub fn custom(&mut self, output: impl Into<String>, reducer: Reducer) -> IntermediateField {
        self.register(IntermediateField::Custom(output.into()), reducer)
    }

    /// The composite fold over every reducer registered so far. The registry stays usable.
    pub fn seal(&self) -> CompositeReducer {
        let (fields, reducers): (Vec<_>, Vec<_>) = self.slots.iter().cloned().unzip();
        CompositeReducer {
            fields: Rc::new(fields),
            reducers: Rc::new(reducers),
            derivations: self.derivations.clone(),
        }
    }
}

/// The accumulator folded by the index: one value per reducer slot, in registration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompositeAccumulator(Vec<Value>);

impl CompositeAccumulator {
    pub fn slots(&self) -> &[Value] {
        &self.0
    }
}

/// Sealed, immutable combination of every registered reducer.
#[derive(Clone, Debug)]
pub struct CompositeReducer {
    fields: Rc<Vec<IntermediateField>>,
    reducers: Rc<Vec<Reducer>>,
    derivations: Vec<Derivation>,
}

impl CompositeReducer {
    pub fn fields(&self) -> &[IntermediateField] {
        &self.fields
    }

    pub fn initial(&self) -> CompositeAccumulator {
        CompositeAccumulator(self.reducers.iter().map(Reducer::initial).collect())
    }

    pub fn add(&self, acc: &mut CompositeAccumulator, row: &Row) {
        for (slot, reducer) in acc.0.iter_mut().zip(self.reducers.iter()) {
            reducer.add(slot, row);
        }
    }

    pub fn remove(&self, acc: &mut CompositeAccumulator, row: &Row) {
        for (slot, reducer) in acc.0.iter_mut().zip(self.reducers.iter()) {
            reducer.remove(slot, row);
        }
    }

    /// The fold handed to the index. It shares this reducer's slots.
    pub fn fold(&self) -> Fold<Row, CompositeAccumulator> {
        let (add, remove, initial) = (self.clone(), self.clone(), self.clone());
        Fold::new(
            move |acc, row| add.add(acc, row),
            move |acc, row| remove.remove(acc, row),
            move || initial.initial(),
        )
    }

    /// Name every slot and evaluate the derivations, in registration order.
    pub fn expand(&self, acc: &CompositeAccumulator) -> Intermediates {
        let mut fields: Intermediates = self
            .fields
            .iter()
            .cloned()
            .zip(
                self.reducers
                    .iter()
                    .zip(&acc.0)
                    .map(|(reducer, slot)| reducer.finish(slot)),
            )
            .collect();
        for derivation in &self.derivations {
            derivation.apply(&mut fields);
        }
        fields
    }
}
