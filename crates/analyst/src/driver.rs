//! Data drivers: how a [`Source`] gets its rows.

use crate::error::AnalystResult;
use crate::field::FieldMap;
use crate::source::Source;
use crate::value::Row;

/// Loads rows into a source when [`Source::fetch`] is called.
pub trait Driver {
    fn fetch(&mut self, source: &Source) -> AnalystResult<()>;
}

/// Hands over a fixed set of rows, and optionally a field map for positional rows, on the first
/// fetch. Later fetches add nothing.
#[derive(Clone, Debug, Default)]
pub struct Preload {
    rows: Vec<Row>,
    field_map: Option<FieldMap>,
}

impl Preload {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            field_map: None,
        }
    }

    pub fn with_field_map(mut self, field_map: FieldMap) -> Self {
        self.field_map = Some(field_map);
        self
    }
}

impl Driver for Preload {
    fn fetch(&mut self, source: &Source) -> AnalystResult<()> {
        if let Some(field_map) = self.field_map.take() {
            source.set_field_map(field_map);
        }
        if !self.rows.is_empty() {
            source.add(std::mem::take(&mut self.rows));
        }
        Ok(())
    }
}
