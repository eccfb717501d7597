use paramstyle::{ParamStyle, Payload};
use record::Value;

/// A database error surfaced by an adapter, carrying the driver's own message
/// verbatim. `integrity` distinguishes constraint violations (unique, foreign
/// key, not-null) from other failures, so the ETL layer can isolate offending
/// rows without knowing which adapter raised.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
    pub integrity: bool,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            integrity: false,
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            integrity: true,
        }
    }
}

/// What a database can do natively, consulted once per bulk run.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// The database has a native single-statement upsert
    /// (`INSERT .. ON CONFLICT DO UPDATE`, `MERGE`, ...).
    pub native_upsert: bool,
    /// The database supports session-scoped temporary tables, required by
    /// the merge fallback.
    pub temp_tables: bool,
}

/// Driver is the connection-level contract an adapter provides: it declares
/// its parameter style and capabilities, opens cursors, and settles
/// transactions. Adapters are not thread-safe in the general case; a process
/// runs multiple pipelines in parallel only by opening one connection each.
pub trait Driver {
    fn param_style(&self) -> ParamStyle;
    fn capabilities(&self) -> Capabilities;
    fn open_cursor(&self) -> Result<Box<dyn DriverCursor>, DriverError>;
    fn begin(&self) -> Result<(), DriverError>;
    fn commit(&self) -> Result<(), DriverError>;
    fn rollback(&self) -> Result<(), DriverError>;
}

/// DriverCursor is the raw cursor contract: execute with a payload already in
/// the driver's native shape, then report the result-set description and
/// fetch raw rows. The facade in [`crate::Cursor`] layers translation and
/// Record production on top.
pub trait DriverCursor {
    fn execute(&mut self, sql: &str, params: &Payload) -> Result<u64, DriverError>;

    /// Execute once per payload. The batch must apply atomically: on failure
    /// no payload of this call may remain applied, so the caller can isolate
    /// offenders by re-executing per row.
    fn execute_batch(&mut self, sql: &str, batch: &[Payload]) -> Result<u64, DriverError>;

    /// Column names of the current result set, or None after a statement
    /// which returns no rows.
    fn columns(&self) -> Option<&[String]>;

    fn fetch(&mut self) -> Result<Option<Vec<Value>>, DriverError>;

    /// Rows affected by the last statement, or -1 when unknown.
    fn rowcount(&self) -> i64;
}
