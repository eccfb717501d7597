use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

use paramstyle::{ParamStyle, Payload};
use record::Value;

use crate::{Capabilities, Driver, DriverCursor, DriverError};

/// SQLite adapter over rusqlite. Cursors share one connection; SQLite
/// declares the qmark style and supports native upsert and session temp
/// tables.
pub struct SqliteDriver {
    conn: Rc<rusqlite::Connection>,
}

impl SqliteDriver {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let conn = rusqlite::Connection::open(path).map_err(db_err)?;
        Ok(Self::wrap(conn))
    }

    pub fn open_in_memory() -> Result<Self, DriverError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(db_err)?;
        Ok(Self::wrap(conn))
    }

    /// Adopt an already-configured connection.
    pub fn wrap(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Rc::new(conn),
        }
    }
}

impl Driver for SqliteDriver {
    fn param_style(&self) -> ParamStyle {
        ParamStyle::Qmark
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_upsert: true,
            temp_tables: true,
        }
    }

    fn open_cursor(&self) -> Result<Box<dyn DriverCursor>, DriverError> {
        Ok(Box::new(SqliteCursor {
            conn: self.conn.clone(),
            columns: None,
            rows: VecDeque::new(),
            rowcount: -1,
        }))
    }

    fn begin(&self) -> Result<(), DriverError> {
        self.conn.execute_batch("BEGIN").map_err(db_err)
    }

    fn commit(&self) -> Result<(), DriverError> {
        self.conn.execute_batch("COMMIT").map_err(db_err)
    }

    fn rollback(&self) -> Result<(), DriverError> {
        self.conn.execute_batch("ROLLBACK").map_err(db_err)
    }
}

// rusqlite statements borrow the connection, so the cursor drains each
// result set inside the execute call and serves fetches from its buffer.
struct SqliteCursor {
    conn: Rc<rusqlite::Connection>,
    columns: Option<Vec<String>>,
    rows: VecDeque<Vec<Value>>,
    rowcount: i64,
}

impl DriverCursor for SqliteCursor {
    fn execute(&mut self, sql: &str, params: &Payload) -> Result<u64, DriverError> {
        self.columns = None;
        self.rows.clear();
        self.rowcount = -1;

        let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
        bind(&mut stmt, params)?;

        if stmt.column_count() > 0 {
            let names: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();

            let mut rows = stmt.raw_query();
            while let Some(row) = rows.next().map_err(db_err)? {
                self.rows.push_back(read_row(row, names.len())?);
            }

            self.rowcount = self.rows.len() as i64;
            self.columns = Some(names);
            Ok(self.rows.len() as u64)
        } else {
            let changed = stmt.raw_execute().map_err(db_err)?;
            self.rowcount = changed as i64;
            Ok(changed as u64)
        }
    }

    fn execute_batch(&mut self, sql: &str, batch: &[Payload]) -> Result<u64, DriverError> {
        self.columns = None;
        self.rows.clear();
        self.rowcount = -1;

        // A savepoint makes the batch atomic: a failure leaves no payload of
        // this call applied, so the caller may re-execute per row to isolate
        // the offender.
        self.conn
            .execute_batch("SAVEPOINT batch_apply")
            .map_err(db_err)?;

        let applied: Result<u64, DriverError> = (|| {
            let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
            let mut total: u64 = 0;
            for payload in batch {
                bind(&mut stmt, payload)?;
                total += stmt.raw_execute().map_err(db_err)? as u64;
            }
            Ok(total)
        })();

        match applied {
            Ok(total) => {
                self.conn
                    .execute_batch("RELEASE batch_apply")
                    .map_err(db_err)?;
                self.rowcount = total as i64;
                Ok(total)
            }
            Err(err) => {
                let _ = self
                    .conn
                    .execute_batch("ROLLBACK TO batch_apply; RELEASE batch_apply");
                Err(err)
            }
        }
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn fetch(&mut self) -> Result<Option<Vec<Value>>, DriverError> {
        Ok(self.rows.pop_front())
    }

    fn rowcount(&self) -> i64 {
        self.rowcount
    }
}

fn bind(stmt: &mut rusqlite::Statement<'_>, payload: &Payload) -> Result<(), DriverError> {
    match payload {
        Payload::Positional(values) => {
            for (index, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(index + 1, to_sql(value))
                    .map_err(db_err)?;
            }
        }
        Payload::Named(pairs) => {
            for (name, value) in pairs {
                let index = stmt
                    .parameter_index(&format!(":{name}"))
                    .map_err(db_err)?
                    .ok_or_else(|| {
                        DriverError::new(format!("statement binds no parameter :{name}"))
                    })?;
                stmt.raw_bind_parameter(index, to_sql(value)).map_err(db_err)?;
            }
        }
    }
    Ok(())
}

fn to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;

    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Integer(i) => Sql::Integer(*i),
        Value::Float(f) => Sql::Real(*f),
        Value::Text(s) => Sql::Text(s.clone()),
        Value::Blob(b) => Sql::Blob(b.clone()),
        // SQLite has no array type; lists bind as JSON text.
        Value::List(_) => Sql::Text(
            serde_json::to_string(value).unwrap_or_else(|_| value.to_string()),
        ),
    }
}

fn read_row(row: &rusqlite::Row<'_>, width: usize) -> Result<Vec<Value>, DriverError> {
    use rusqlite::types::ValueRef;

    let mut out = Vec::with_capacity(width);
    for index in 0..width {
        let value = match row.get_ref(index).map_err(db_err)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        };
        out.push(value);
    }
    Ok(out)
}

fn db_err(err: rusqlite::Error) -> DriverError {
    let integrity = matches!(
        &err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    );
    DriverError {
        message: err.to_string(),
        integrity,
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use paramstyle::Payload;
    use record::Value;

    use super::SqliteDriver;
    use crate::{Driver, DriverCursor};

    fn cursor_over_seed() -> Box<dyn DriverCursor> {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let mut cursor = driver.open_cursor().unwrap();
        cursor
            .execute(
                "CREATE TABLE t (id INTEGER PRIMARY KEY NOT NULL, v TEXT)",
                &Payload::Positional(vec![]),
            )
            .unwrap();
        cursor
    }

    #[test]
    fn batch_failures_roll_back_atomically() {
        let mut cursor = cursor_over_seed();

        let good = |id: i64| {
            Payload::Positional(vec![Value::Integer(id), Value::Text("x".to_string())])
        };
        // The duplicate key fails the batch; the savepoint unwinds rows 1-2.
        let err = cursor
            .execute_batch(
                "INSERT INTO t (id, v) VALUES (?, ?)",
                &[good(1), good(2), good(1)],
            )
            .unwrap_err();
        assert!(err.integrity);

        cursor
            .execute("SELECT COUNT(*) FROM t", &Payload::Positional(vec![]))
            .unwrap();
        assert_eq!(cursor.fetch().unwrap(), Some(vec![Value::Integer(0)]));
    }

    #[test]
    fn type_lattice_round_trips() {
        let mut cursor = cursor_over_seed();

        cursor
            .execute(
                "SELECT ?, ?, ?, ?, ?",
                &Payload::Positional(vec![
                    Value::Null,
                    Value::Integer(-3),
                    Value::Float(0.5),
                    Value::Text("hi".to_string()),
                    Value::Blob(vec![1, 2]),
                ]),
            )
            .unwrap();

        assert_eq!(
            cursor.fetch().unwrap(),
            Some(vec![
                Value::Null,
                Value::Integer(-3),
                Value::Float(0.5),
                Value::Text("hi".to_string()),
                Value::Blob(vec![1, 2]),
            ])
        );
        assert_eq!(cursor.fetch().unwrap(), None);
    }

    #[test]
    fn integrity_errors_are_flagged() {
        let mut cursor = cursor_over_seed();
        let row = Payload::Positional(vec![Value::Integer(1), Value::Null]);

        cursor
            .execute("INSERT INTO t (id, v) VALUES (?, ?)", &row)
            .unwrap();
        let err = cursor
            .execute("INSERT INTO t (id, v) VALUES (?, ?)", &row)
            .unwrap_err();
        assert!(err.integrity);

        let err = cursor
            .execute("SELECT * FROM missing", &Payload::Positional(vec![]))
            .unwrap_err();
        assert!(!err.integrity);

        // Cursors of one driver share the connection and see its state.
        let driver = Rc::new(SqliteDriver::open_in_memory().unwrap());
        let mut one = driver.open_cursor().unwrap();
        one.execute("CREATE TABLE s (x INTEGER)", &Payload::Positional(vec![]))
            .unwrap();
        let mut two = driver.open_cursor().unwrap();
        two.execute("SELECT COUNT(*) FROM s", &Payload::Positional(vec![]))
            .unwrap();
        assert_eq!(two.fetch().unwrap(), Some(vec![Value::Integer(0)]));
    }
}
