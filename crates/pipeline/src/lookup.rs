use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use drivers::SharedCursor;
use itertools::Itertools;
use record::{normalize, Record, Schema, Value};

use crate::Error;

/// How a lookup holds its reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Materialize the whole table with one SELECT on first call; every
    /// subsequent call is a pure map probe. Not for tables larger than
    /// working-set memory.
    Preload,
    /// Fill the map per miss with a prepared single-key query.
    Lazy,
    /// Query on every call.
    None,
}

/// Lookup wraps a reference query as a callable transform: key columns are
/// read from the source record, and the configured return columns come back
/// as a scalar (one return) or a Record (several). No match is NULL.
pub struct Lookup {
    table: String,
    keys: Vec<String>,
    returns: Vec<String>,
    mode: CacheMode,
    cursor: SharedCursor,
    returns_schema: Arc<Schema>,
    // Cached rows by encoded key; a cached None is a remembered miss.
    cache: RefCell<HashMap<String, Option<Vec<Value>>>>,
    preloaded: Cell<bool>,
    queries: Cell<u64>,
}

impl Lookup {
    pub fn new(
        cursor: SharedCursor,
        table: impl Into<String>,
        keys: Vec<String>,
        returns: Vec<String>,
        mode: CacheMode,
    ) -> Self {
        let returns_schema = Schema::new(&returns);
        Self {
            table: table.into(),
            keys,
            returns,
            mode,
            cursor,
            returns_schema,
            cache: RefCell::new(HashMap::new()),
            preloaded: Cell::new(false),
            queries: Cell::new(0),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// SQL round-trips issued so far; a preloaded lookup stays at one.
    pub fn queries(&self) -> u64 {
        self.queries.get()
    }

    /// The full matched row over the return columns, or None.
    pub fn row(&self, record: &Record) -> Result<Option<Record>, Error> {
        let key = self.key_values(record)?;
        match self.fetch(&key)? {
            Some(values) => Ok(Some(Record::new(self.returns_schema.clone(), values)?)),
            None => Ok(None),
        }
    }

    /// The transform-shaped result: scalar for one return column, a list for
    /// several, NULL for no match.
    pub fn transform(&self, record: &Record) -> Result<Value, Error> {
        let key = self.key_values(record)?;
        Ok(match self.fetch(&key)? {
            None => Value::Null,
            Some(mut values) if values.len() == 1 => values.pop().unwrap_or(Value::Null),
            Some(values) => Value::List(values),
        })
    }

    /// Whether the key columns of `record` exist in the reference table.
    pub fn contains(&self, record: &Record) -> Result<bool, Error> {
        let key = self.key_values(record)?;
        Ok(self.fetch(&key)?.is_some())
    }

    fn key_values<'r>(&self, record: &'r Record) -> Result<Vec<&'r Value>, Error> {
        let missing: Vec<String> = self
            .keys
            .iter()
            .filter(|k| !record.contains_key(k))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::LookupKeysMissing {
                table: self.table.clone(),
                missing,
            });
        }
        Ok(self
            .keys
            .iter()
            .map(|k| record.get(k).unwrap_or(&Value::Null))
            .collect())
    }

    fn fetch(&self, key: &[&Value]) -> Result<Option<Vec<Value>>, Error> {
        let encoded = encode_key(key);

        match self.mode {
            CacheMode::Preload => {
                self.ensure_preloaded()?;
                Ok(self.cache.borrow().get(&encoded).cloned().flatten())
            }
            CacheMode::Lazy => {
                if let Some(hit) = self.cache.borrow().get(&encoded) {
                    return Ok(hit.clone());
                }
                let row = self.query_one(key)?;
                self.cache.borrow_mut().insert(encoded, row.clone());
                Ok(row)
            }
            CacheMode::None => self.query_one(key),
        }
    }

    // One SELECT of the whole reference table, exactly once.
    fn ensure_preloaded(&self) -> Result<(), Error> {
        if self.preloaded.get() {
            return Ok(());
        }

        let columns = self.keys.iter().chain(self.returns.iter()).join(", ");
        let sql = format!("SELECT {columns} FROM {}", self.table);
        tracing::debug!(table = %self.table, "preloading lookup cache");

        let mut cursor = self.cursor.borrow_mut();
        cursor.run(&sql)?;
        self.queries.set(self.queries.get() + 1);

        let mut cache = self.cache.borrow_mut();
        while let Some(row) = cursor.fetchone()? {
            let values = row.values();
            let key: Vec<&Value> = values[..self.keys.len()].iter().collect();
            let returns = values[self.keys.len()..].to_vec();
            cache.insert(encode_key(&key), Some(returns));
        }

        self.preloaded.set(true);
        Ok(())
    }

    fn query_one(&self, key: &[&Value]) -> Result<Option<Vec<Value>>, Error> {
        // Validations configure no return columns; select the keys instead so
        // presence still comes back as a row.
        let columns = if self.returns.is_empty() {
            self.keys.iter().join(", ")
        } else {
            self.returns.iter().join(", ")
        };

        let mut sql = format!("SELECT {columns} FROM {} WHERE ", self.table);
        let mut params: HashMap<String, Value> = HashMap::new();
        for (i, (name, value)) in self.keys.iter().zip(key).enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            let param = normalize(name);
            let _ = write!(sql, "{name} = :{param}");
            params.insert(param, (*value).clone());
        }

        let mut cursor = self.cursor.borrow_mut();
        cursor.execute(&sql, &params)?;
        self.queries.set(self.queries.get() + 1);

        let row = cursor.fetchone()?;
        if self.returns.is_empty() {
            // Presence only.
            return Ok(row.map(|_| Vec::new()));
        }
        Ok(row.map(|r| r.values().to_vec()))
    }
}

// Encode a key tuple for the cache map. Values are tagged by type so that
// Text("7") and Integer(7) stay distinct keys.
fn encode_key(key: &[&Value]) -> String {
    let mut out = String::new();
    for value in key {
        match value {
            Value::Null => out.push_str("n:"),
            Value::Bool(b) => {
                let _ = write!(out, "o:{b}");
            }
            Value::Integer(i) => {
                let _ = write!(out, "i:{i}");
            }
            Value::Float(f) => {
                let _ = write!(out, "f:{}", f.to_bits());
            }
            Value::Text(s) => {
                let _ = write!(out, "t:{s}");
            }
            Value::Blob(b) => {
                let _ = write!(out, "b:{b:?}");
            }
            Value::List(l) => {
                let parts: Vec<&Value> = l.iter().collect();
                let _ = write!(out, "l:[{}]", encode_key(&parts));
            }
        }
        out.push('\u{1f}');
    }
    out
}

/// Validate passes the current value through unchanged when the record's key
/// columns exist in the reference table, and logs a warning (counted on the
/// instance) when they do not. A miss never fails the run.
pub struct Validate {
    lookup: Lookup,
    misses: Cell<u64>,
}

impl Validate {
    pub fn new(
        cursor: SharedCursor,
        table: impl Into<String>,
        keys: Vec<String>,
        mode: CacheMode,
    ) -> Self {
        Self {
            lookup: Lookup::new(cursor, table, keys, Vec::new(), mode),
            misses: Cell::new(0),
        }
    }

    pub fn table(&self) -> &str {
        self.lookup.table()
    }

    pub fn misses(&self) -> u64 {
        self.misses.get()
    }

    pub(crate) fn check(
        &self,
        value: Value,
        record: &Record,
    ) -> Result<Value, crate::TransformError> {
        if !self.lookup.contains(record).map_err(crate::TransformError::Fatal)? {
            self.misses.set(self.misses.get() + 1);
            tracing::warn!(
                table = %self.lookup.table(),
                keys = ?self.lookup.keys(),
                "validation miss"
            );
        }
        Ok(value)
    }
}
