//! Named-field result rows.

use serde::ser::{Serialize, SerializeMap, Serializer};
use umstore_core::Value;
use crate::error::{MetricError, Result};

/// One metric result, immutable once built.
///
/// Field names and their order come from the owning metric's header.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    header: &'static [&'static str],
    values: Vec<Value>,
}

impl ResultRow {
    /// Pairs `values` with `header`; arities must agree.
    pub fn new(header: &'static [&'static str], values: Vec<Value>) -> Result<Self> {
        if header.len() != values.len() {
            return Err(MetricError::HeaderMismatch {
                expected: header.len(),
                actual: values.len(),
            });
        }
        Ok(Self { header, values })
    }

    pub fn header(&self) -> &'static [&'static str] {
        self.header
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.header
            .iter()
            .position(|name| *name == field)
            .map(|idx| &self.values[idx])
    }

    /// `(field, value)` pairs in header order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &Value)> + '_ {
        self.header.iter().copied().zip(self.values.iter())
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.fields() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
