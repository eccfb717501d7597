use std::collections::HashMap;
use std::sync::Arc;

use crate::{Error, Schema, Value};

/// Record is the hybrid row shared by cursors, readers, writers, and the
/// transformation pipeline: positionally ordered values with key access by
/// original or normalized column name. The schema is typically shared by
/// every row of one result set; a Record that gains or loses a column
/// detaches onto its own schema.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Result<Self, Error> {
        if schema.len() != values.len() {
            return Err(Error::Arity {
                names: schema.len(),
                values: values.len(),
            });
        }
        Ok(Self { schema, values })
    }

    /// Build a Record from (name, value) pairs, deriving a schema of its own.
    pub fn from_pairs<I, S, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: AsRef<str>,
        V: Into<Value>,
    {
        let (names, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(n, v)| (n.as_ref().to_string(), v.into()))
            .unzip();
        Self {
            schema: Schema::new(names),
            values,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Original column names, in position order.
    pub fn keys(&self) -> &[String] {
        self.schema.names()
    }

    /// Normalized column names, in position order.
    pub fn keys_normalized(&self) -> &[String] {
        self.schema.normalized()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.schema.index_of(key).is_some()
    }

    /// All values, in position order. Slicing a Record is slicing this.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value for `key`, by exact original name or normalized fallback.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.schema.index_of(key).map(|i| &self.values[i])
    }

    /// Like `get`, but a missing key is an error naming it.
    pub fn field(&self, key: &str) -> Result<&Value, Error> {
        self.get(key).ok_or_else(|| Error::KeyNotFound {
            key: key.to_string(),
        })
    }

    pub fn to_map(&self) -> HashMap<String, Value> {
        self.schema
            .names()
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    pub fn set_at(&mut self, index: usize, value: impl Into<Value>) -> Result<(), Error> {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(Error::KeyNotFound {
                key: index.to_string(),
            }),
        }
    }

    /// Set `key` to `value`. An existing column is updated in place; a new
    /// key appends a column, detaching this row from any shared schema.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        match self.schema.index_of(key) {
            Some(index) => self.values[index] = value.into(),
            None => {
                self.schema = self.schema.with_appended(key);
                self.values.push(value.into());
            }
        }
    }

    /// Remove `key` and return its value, detaching from any shared schema.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.schema.index_of(key)?;
        self.schema = self.schema.without(index);
        Some(self.values.remove(index))
    }
}

/// Records are equal when their original names and values both match,
/// position for position.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.names() == other.schema.names() && self.values == other.values
    }
}

impl<'r> IntoIterator for &'r Record {
    type Item = &'r Value;
    type IntoIter = std::slice::Iter<'r, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
