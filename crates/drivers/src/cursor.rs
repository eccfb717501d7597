use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use paramstyle::{ParamSource, ParamStyle, Payload, SqlTemplate, Statement};
use record::{Record, Schema};

use crate::{Capabilities, Driver, DriverCursor, Error};

/// The single-threaded sharing handle for one cursor: the table that issues
/// DML and the lookups embedded in its transforms borrow the same cursor
/// strictly sequentially.
pub type SharedCursor = Rc<RefCell<Cursor>>;

/// Cursor is the uniform facade over a driver cursor. It translates canonical
/// queries to the driver's parameter style (caching the translation per
/// canonical text), produces `Record` rows sharing one schema per result set,
/// and loads statements from SQL files. Database errors propagate unchanged;
/// the facade adds no retries.
pub struct Cursor {
    driver: Rc<dyn Driver>,
    inner: Box<dyn DriverCursor>,
    style: ParamStyle,
    caps: Capabilities,
    statements: HashMap<String, Rc<Statement>>,
    schema: Option<Arc<Schema>>,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("style", &self.style)
            .field("caps", &self.caps)
            .field("schema", &self.schema)
            .finish()
    }
}

impl Cursor {
    pub fn open(driver: Rc<dyn Driver>) -> Result<Self, Error> {
        let inner = driver.open_cursor()?;
        Ok(Self {
            style: driver.param_style(),
            caps: driver.capabilities(),
            driver,
            inner,
            statements: HashMap::new(),
            schema: None,
        })
    }

    pub fn shared(driver: Rc<dyn Driver>) -> Result<SharedCursor, Error> {
        Ok(Rc::new(RefCell::new(Self::open(driver)?)))
    }

    /// Open another cursor over the same connection.
    pub fn sibling(&self) -> Result<Cursor, Error> {
        Self::open(self.driver.clone())
    }

    pub fn param_style(&self) -> ParamStyle {
        self.style
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn begin(&self) -> Result<(), Error> {
        Ok(self.driver.begin()?)
    }

    pub fn commit(&self) -> Result<(), Error> {
        Ok(self.driver.commit()?)
    }

    pub fn rollback(&self) -> Result<(), Error> {
        Ok(self.driver.rollback()?)
    }

    /// Translate a canonical query to this driver's style, parsing it at most
    /// once per cursor.
    pub fn statement(&mut self, sql: &str) -> Result<Rc<Statement>, Error> {
        if let Some(statement) = self.statements.get(sql) {
            return Ok(statement.clone());
        }
        let template = SqlTemplate::parse(sql)?;
        let statement = Rc::new(template.render(self.style));
        self.statements
            .insert(sql.to_string(), statement.clone());
        Ok(statement)
    }

    /// Build a reusable prepared statement from canonical SQL.
    pub fn prepare(&mut self, sql: &str) -> Result<Prepared, Error> {
        Ok(Prepared {
            statement: self.statement(sql)?,
        })
    }

    /// Load a SQL file (one canonical statement) and prepare it. Translation
    /// errors surface here, never at execution time.
    pub fn prepare_file(&mut self, path: impl AsRef<Path>) -> Result<Prepared, Error> {
        let path = path.as_ref();
        let sql = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            path: path.display().to_string(),
            err,
        })?;
        self.prepare(&sql)
    }

    /// Execute a statement which binds nothing.
    pub fn run(&mut self, sql: &str) -> Result<&mut Self, Error> {
        self.execute(sql, &())
    }

    pub fn execute<P: ParamSource>(&mut self, sql: &str, params: &P) -> Result<&mut Self, Error> {
        let statement = self.statement(sql)?;
        self.execute_statement(&statement, params)
    }

    pub fn execute_file<P: ParamSource>(
        &mut self,
        path: impl AsRef<Path>,
        params: &P,
    ) -> Result<&mut Self, Error> {
        let prepared = self.prepare_file(path)?;
        self.execute_prepared(&prepared, params)
    }

    pub fn execute_prepared<P: ParamSource>(
        &mut self,
        prepared: &Prepared,
        params: &P,
    ) -> Result<&mut Self, Error> {
        let statement = prepared.statement.clone();
        self.execute_statement(&statement, params)
    }

    pub fn execute_statement<P: ParamSource>(
        &mut self,
        statement: &Statement,
        params: &P,
    ) -> Result<&mut Self, Error> {
        let payload = statement.bind(params);
        self.execute_payload(statement.sql(), &payload)?;
        Ok(self)
    }

    /// Execute with an already-materialized payload. This is the primitive
    /// the bulk driver builds batches from.
    pub fn execute_payload(&mut self, sql: &str, payload: &Payload) -> Result<u64, Error> {
        tracing::debug!(sql, params = payload.len(), "executing statement");
        self.schema = None;
        Ok(self.inner.execute(sql, payload)?)
    }

    /// Translate once and execute per parameter set, deferring to the
    /// driver's batch call.
    pub fn executemany<P: ParamSource>(&mut self, sql: &str, batch: &[P]) -> Result<u64, Error> {
        let statement = self.statement(sql)?;
        let payloads: Vec<Payload> = batch.iter().map(|p| statement.bind(p)).collect();
        self.execute_payload_batch(statement.sql(), &payloads)
    }

    /// Batch primitive: one translated statement, many payloads. The driver
    /// applies the batch atomically.
    pub fn execute_payload_batch(
        &mut self,
        sql: &str,
        payloads: &[Payload],
    ) -> Result<u64, Error> {
        tracing::debug!(sql, rows = payloads.len(), "executing batch");
        self.schema = None;
        Ok(self.inner.execute_batch(sql, payloads)?)
    }

    // The first fetch after an execute initializes the schema from the
    // driver's column description; every row of the result set shares it.
    fn result_schema(&mut self) -> Result<Arc<Schema>, Error> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        let columns = self.inner.columns().ok_or(Error::NoResultSet)?;
        let schema = Schema::new(columns);
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    pub fn fetchone(&mut self) -> Result<Option<Record>, Error> {
        let schema = self.result_schema()?;
        match self.inner.fetch()? {
            Some(values) => Ok(Some(Record::new(schema, values)?)),
            None => Ok(None),
        }
    }

    pub fn fetchmany(&mut self, n: usize) -> Result<Vec<Record>, Error> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.fetchone()? {
                Some(record) => out.push(record),
                None => break,
            }
        }
        Ok(out)
    }

    pub fn fetchall(&mut self) -> Result<Vec<Record>, Error> {
        let mut out = Vec::new();
        while let Some(record) = self.fetchone()? {
            out.push(record);
        }
        Ok(out)
    }

    pub fn iter(&mut self) -> Records<'_> {
        Records { cursor: self }
    }

    /// Column names of the current result set.
    pub fn columns(&self, normalized: bool) -> Option<Vec<String>> {
        match (&self.schema, self.inner.columns()) {
            (Some(schema), _) => Some(if normalized {
                schema.normalized().to_vec()
            } else {
                schema.names().to_vec()
            }),
            (None, Some(columns)) if !normalized => Some(columns.to_vec()),
            (None, Some(columns)) => {
                Some(Schema::new(columns).normalized().to_vec())
            }
            (None, None) => None,
        }
    }

    pub fn rowcount(&self) -> i64 {
        self.inner.rowcount()
    }
}

/// A translated query bound to a cursor's parameter style, reusable for any
/// number of executions and released with the cursor.
#[derive(Debug, Clone)]
pub struct Prepared {
    statement: Rc<Statement>,
}

impl Prepared {
    pub fn sql(&self) -> &str {
        self.statement.sql()
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }
}

/// Iterator over the current result set, yielding Records.
pub struct Records<'c> {
    cursor: &'c mut Cursor,
}

impl Iterator for Records<'_> {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.fetchone().transpose()
    }
}
