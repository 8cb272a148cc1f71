//! Query result records.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::{DriverError, DriverResult};
use crate::bolt::Value;

/// Column table shared by every record of one result.
///
/// Records hold their values positionally; the name-to-index table is built
/// once per result and shared, so a million-row stream carries one copy of
/// the column names.
#[derive(Debug, Clone, Default)]
pub struct RecordKeys {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl RecordKeys {
    /// Build a shared column table.
    pub fn new(names: Vec<String>) -> Arc<Self> {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        Arc::new(Self { names, index })
    }

    /// Column names in server order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of a column name.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A single result row: ordered values under a shared column table.
#[derive(Debug, Clone)]
pub struct Record {
    keys: Arc<RecordKeys>,
    values: Vec<Value>,
}

impl Record {
    /// Create a record from a shared column table and positional values.
    pub fn new(keys: Arc<RecordKeys>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    /// Create a record with its own column table. Convenient in tests and
    /// for synthesized records.
    pub fn from_pairs(pairs: Vec<(&str, Value)>) -> Self {
        let (names, values): (Vec<_>, Vec<_>) = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .unzip();
        Self {
            keys: RecordKeys::new(names),
            values,
        }
    }

    /// Column names in server order.
    pub fn keys(&self) -> &[String] {
        self.keys.names()
    }

    /// Shared column table.
    pub fn key_table(&self) -> &Arc<RecordKeys> {
        &self.keys
    }

    /// Positional values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by column name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys.index_of(key).and_then(|i| self.values.get(i))
    }

    /// Value by position.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Whether a column exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.index_of(key).is_some()
    }

    /// Boolean value by column name.
    pub fn get_bool(&self, key: &str) -> DriverResult<bool> {
        self.typed(key, |v| v.as_bool(), "Boolean")
    }

    /// Integer value by column name.
    pub fn get_int(&self, key: &str) -> DriverResult<i64> {
        self.typed(key, |v| v.as_int(), "Integer")
    }

    /// Float value by column name.
    pub fn get_float(&self, key: &str) -> DriverResult<f64> {
        self.typed(key, |v| v.as_float(), "Float")
    }

    /// String value by column name.
    pub fn get_string(&self, key: &str) -> DriverResult<String> {
        self.typed(key, |v| v.as_str().map(str::to_string), "String")
    }

    /// Optional typed access: Null and missing columns yield None.
    pub fn get_optional_int(&self, key: &str) -> DriverResult<Option<i64>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get_int(key).map(Some),
        }
    }

    /// Copy into an owned name-to-value map.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys
            .names()
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    /// Convert into a PackStream map value. Used when records are grouped
    /// into batch payloads.
    pub fn to_value(&self) -> Value {
        Value::Map(self.to_map())
    }

    fn typed<T>(
        &self,
        key: &str,
        extract: impl Fn(&Value) -> Option<T>,
        expected: &str,
    ) -> DriverResult<T> {
        let value = self
            .get(key)
            .ok_or_else(|| DriverError::usage(format!("Key '{}' not found", key)))?;
        extract(value).ok_or_else(|| {
            DriverError::usage(format!(
                "Key '{}' is {}, expected {}",
                key,
                value.type_name(),
                expected
            ))
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .names()
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {:?}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.keys.names() == other.keys.names() && self.values == other.values
    }
}
