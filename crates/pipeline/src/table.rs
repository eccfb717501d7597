use std::collections::HashSet;
use std::rc::Rc;

use drivers::SharedCursor;
use itertools::Itertools;
use paramstyle::{ParamSource, Payload, Statement};
use record::{Record, Schema, Value};

use crate::column::{Column, ColumnSpec, Source};
use crate::transform::TransformError;
use crate::{Counts, Error, Op};

/// The outcome of a non-strict single-row execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Requirements were not met; the row was counted as incomplete and no
    /// SQL was issued.
    Incomplete,
}

/// Table models a target table as a reusable, stateful transformation
/// pipeline: an ordered set of column descriptors, the current row's resolved
/// values, a per-operation readiness bitmap, cached DML statements, and
/// operation counters.
pub struct Table {
    name: String,
    columns: Vec<Column>,
    cursor: SharedCursor,
    values: Vec<Value>,
    ready: u8,
    counts: Counts,
    null_sentinels: HashSet<String>,
    statements: [Option<Rc<Statement>>; 5],
}

impl Table {
    pub fn new(
        name: impl Into<String>,
        cursor: SharedCursor,
        specs: Vec<ColumnSpec>,
    ) -> Result<Self, Error> {
        let name = name.into();

        let mut columns = Vec::with_capacity(specs.len());
        for spec in specs {
            columns.push(Column::from_spec(spec, &cursor)?);
        }

        // Parameter names must be unique within the table's DML; reuse the
        // schema normalizer, which suffixes collisions.
        let schema = Schema::new(columns.iter().map(Column::name));
        for (column, param) in columns.iter_mut().zip(schema.normalized()) {
            column.param = param.clone();
        }

        let values = vec![Value::Null; columns.len()];
        let mut table = Self {
            name,
            columns,
            cursor,
            values,
            ready: 0,
            counts: Counts::default(),
            null_sentinels: ["", "NULL", "<null>", "\\N"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            statements: Default::default(),
        };
        table.refresh_readiness();
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn cursor(&self) -> &SharedCursor {
        &self.cursor
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// Replace the set of strings normalized to SQL NULL at resolution time.
    pub fn set_null_sentinels<I, S>(&mut self, sentinels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.null_sentinels = sentinels.into_iter().map(Into::into).collect();
    }

    /// Run the five-stage resolver for every column against one source
    /// record, then refresh the readiness bitmap. This is the hot path.
    ///
    /// A failing transform logs, counts an error, and nulls the column;
    /// misconfiguration and database errors propagate.
    pub fn set_values(&mut self, record: &Record) -> Result<(), Error> {
        for index in 0..self.columns.len() {
            let column = &self.columns[index];

            // Source.
            let mut value = match &column.source {
                Source::None | Source::Whole => Value::Null,
                Source::Field(field) => record.get(field).cloned().unwrap_or(Value::Null),
                Source::Fields(fields) => Value::List(
                    fields
                        .iter()
                        .map(|f| record.get(f).cloned().unwrap_or(Value::Null))
                        .collect(),
                ),
            };

            // Null-sentinel normalization.
            if let Value::Text(s) = &value {
                if self.null_sentinels.contains(s.as_str()) {
                    value = Value::Null;
                }
            }

            // Default on null or empty string.
            if value.is_empty() {
                if let Some(default) = &column.default {
                    value = default.clone();
                }
            }

            // Transforms.
            for transform in &column.transforms {
                match transform.apply(value, record) {
                    Ok(v) => value = v,
                    Err(TransformError::Soft(reason)) => {
                        tracing::warn!(
                            table = %self.name,
                            column = %column.name,
                            %reason,
                            "transform failed; column resolves to NULL"
                        );
                        self.counts.error += 1;
                        value = Value::Null;
                        break;
                    }
                    Err(TransformError::Fatal(err)) => return Err(err),
                }
            }

            // The db-expression stage happens at SQL generation: a standalone
            // expression discards this value, a '#' expression binds it.
            self.values[index] = value;
        }

        self.refresh_readiness();
        Ok(())
    }

    /// O(1) test of the readiness bit for `op`.
    pub fn is_ready(&self, op: Op) -> bool {
        self.ready & op.mask() != 0
    }

    /// Recompute every operation's readiness bit from the current values.
    /// Call after mutating values directly with [`Table::set_value`].
    pub fn refresh_readiness(&mut self) {
        let mut ready = 0u8;
        for op in Op::ALL {
            let met = self
                .columns
                .iter()
                .zip(&self.values)
                .all(|(c, v)| !c.participation(op).required || !v.is_null());
            if met {
                ready |= op.mask();
            }
        }
        self.ready = ready;
    }

    /// Full recomputation for diagnostics: does the current row satisfy `op`?
    pub fn reqs_met(&self, op: Op) -> bool {
        self.reqs_missing(op).is_empty()
    }

    /// The names of required columns currently unresolved for `op`.
    pub fn reqs_missing(&self, op: Op) -> Vec<String> {
        self.columns
            .iter()
            .zip(&self.values)
            .filter(|(c, v)| c.participation(op).required && v.is_null())
            .map(|(c, _)| c.name.clone())
            .collect()
    }

    /// The current resolved value of one column.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .map(|i| &self.values[i])
    }

    /// Overwrite one current value directly. The readiness bitmap is stale
    /// until [`Table::refresh_readiness`] runs.
    pub fn set_value(&mut self, column: &str, value: impl Into<Value>) -> Result<(), Error> {
        match self.columns.iter().position(|c| c.name == column) {
            Some(index) => {
                self.values[index] = value.into();
                Ok(())
            }
            None => Err(Error::NoSuchColumn {
                table: self.name.clone(),
                column: column.to_string(),
            }),
        }
    }

    /// Single-row DML. An unready row is counted as incomplete and issues no
    /// SQL; readiness failures never raise here.
    pub fn execute(&mut self, op: Op) -> Result<Outcome, Error> {
        if !self.is_ready(op) {
            self.counts.incomplete += 1;
            return Ok(Outcome::Incomplete);
        }
        self.execute_ready(op)?;
        Ok(Outcome::Applied)
    }

    /// Single-row DML which raises a requirements-not-met error naming the
    /// missing columns instead of counting the row incomplete.
    pub fn execute_strict(&mut self, op: Op) -> Result<(), Error> {
        if !self.is_ready(op) {
            return Err(Error::ReqsNotMet {
                table: self.name.clone(),
                op,
                missing: self.reqs_missing(op),
            });
        }
        self.execute_ready(op)
    }

    // Requirements already checked; materialize, bind, execute, count.
    fn execute_ready(&mut self, op: Op) -> Result<(), Error> {
        let statement = self.statement(op)?;
        let payload = statement.bind(&self.current_values());
        self.cursor
            .borrow_mut()
            .execute_payload(statement.sql(), &payload)?;
        self.counts.bump(op, 1);
        Ok(())
    }

    /// Execute the SELECT-by-key statement for the current key values and
    /// return the matching row, if any.
    pub fn fetch(&mut self) -> Result<Option<Record>, Error> {
        let statement = self.statement(Op::Select)?;
        let payload = statement.bind(&self.current_values());

        let record = {
            let mut cursor = self.cursor.borrow_mut();
            cursor.execute_payload(statement.sql(), &payload)?;
            cursor.fetchone()?
        };
        self.counts.select += 1;
        Ok(record)
    }

    /// The translated DML text for `op`, deterministic and cached.
    pub fn sql(&mut self, op: Op) -> Result<String, Error> {
        Ok(self.statement(op)?.sql().to_string())
    }

    /// The translated, cached DML statement for `op`.
    pub fn statement(&mut self, op: Op) -> Result<Rc<Statement>, Error> {
        if let Some(statement) = &self.statements[op.index()] {
            return Ok(statement.clone());
        }
        let canonical = self.canonical_sql(op)?;
        let statement = self.cursor.borrow_mut().statement(&canonical)?;
        self.statements[op.index()] = Some(statement.clone());
        Ok(statement)
    }

    /// The parameter payload for `op` over the current values, in the shape
    /// the cursor's driver accepts. The bulk driver batches these.
    pub fn payload(&mut self, op: Op) -> Result<Payload, Error> {
        let statement = self.statement(op)?;
        Ok(statement.bind(&self.current_values()))
    }

    /// Bind an arbitrary statement against the current values. The bulk
    /// driver uses this for statements of its own, like temp-table staging.
    pub fn bind(&self, statement: &Statement) -> Payload {
        statement.bind(&self.current_values())
    }

    // Bulk-driver accounting hooks: the bulk driver shares these counters
    // with single-row execution.

    pub fn mark_incomplete(&mut self) {
        self.counts.incomplete += 1;
    }

    pub fn mark_error(&mut self) {
        self.counts.error += 1;
    }

    pub fn mark_applied(&mut self, op: Op, rows: u64) {
        self.counts.bump(op, rows);
    }

    fn current_values(&self) -> CurrentValues<'_> {
        CurrentValues {
            columns: &self.columns,
            values: &self.values,
        }
    }

    // Generate the canonical (named-style) DML for `op`; translation to the
    // driver's style goes through the cursor.
    fn canonical_sql(&self, op: Op) -> Result<String, Error> {
        let in_sql = |op: Op| self.columns.iter().filter(move |c| c.participation(op).in_sql);
        let keys: Vec<&Column> = self.columns.iter().filter(|c| c.key).collect();

        let key_predicate = || -> Result<String, Error> {
            if keys.is_empty() {
                return Err(Error::NoKeyColumns {
                    table: self.name.clone(),
                    op,
                });
            }
            Ok(keys
                .iter()
                .map(|c| format!("{} = :{}", c.name, c.param))
                .join(" AND "))
        };

        match op {
            Op::Insert => {
                let columns: Vec<&Column> = in_sql(Op::Insert).collect();
                if columns.is_empty() {
                    return Err(Error::NoColumns {
                        table: self.name.clone(),
                        op,
                    });
                }
                Ok(format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    self.name,
                    columns.iter().map(|c| c.name.as_str()).join(", "),
                    columns.iter().map(|c| c.value_sql()).join(", "),
                ))
            }
            Op::Update => {
                let sets: Vec<&Column> = in_sql(Op::Update).collect();
                if sets.is_empty() {
                    return Err(Error::NoColumns {
                        table: self.name.clone(),
                        op,
                    });
                }
                Ok(format!(
                    "UPDATE {} SET {} WHERE {}",
                    self.name,
                    sets.iter()
                        .map(|c| format!("{} = {}", c.name, c.value_sql()))
                        .join(", "),
                    key_predicate()?,
                ))
            }
            Op::Delete => Ok(format!("DELETE FROM {} WHERE {}", self.name, key_predicate()?)),
            Op::Select => Ok(format!(
                "SELECT {} FROM {} WHERE {}",
                self.columns.iter().map(|c| c.name.as_str()).join(", "),
                self.name,
                key_predicate()?,
            )),
            Op::Merge => {
                if !self.cursor.borrow().capabilities().native_upsert {
                    return Err(Error::MergeUnsupported);
                }
                let columns: Vec<&Column> = in_sql(Op::Merge).collect();
                if columns.is_empty() {
                    return Err(Error::NoColumns {
                        table: self.name.clone(),
                        op,
                    });
                }
                if keys.is_empty() {
                    return Err(Error::NoKeyColumns {
                        table: self.name.clone(),
                        op,
                    });
                }

                // The update side excludes keys and no-update columns.
                let updates = columns
                    .iter()
                    .filter(|c| !c.key && !c.no_update)
                    .map(|c| format!("{} = excluded.{}", c.name, c.name))
                    .join(", ");
                let conflict = if updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {updates}")
                };

                Ok(format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
                    self.name,
                    columns.iter().map(|c| c.name.as_str()).join(", "),
                    columns.iter().map(|c| c.value_sql()).join(", "),
                    keys.iter().map(|c| c.name.as_str()).join(", "),
                    conflict,
                ))
            }
        }
    }
}

// The current row's values viewed as a parameter source, keyed by the
// columns' unique parameter names.
struct CurrentValues<'t> {
    columns: &'t [Column],
    values: &'t [Value],
}

impl ParamSource for CurrentValues<'_> {
    fn param(&self, name: &str) -> Option<Value> {
        self.columns
            .iter()
            .position(|c| c.param == name)
            .map(|i| self.values[i].clone())
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use drivers::{Cursor, SharedCursor, SqliteDriver};
    use record::{Record, Value};

    use super::{Outcome, Table};
    use crate::{ColumnSpec, Error, Op, Transform};

    fn cursor() -> SharedCursor {
        let driver = Rc::new(SqliteDriver::open_in_memory().unwrap());
        let cursor = Cursor::shared(driver).unwrap();
        cursor
            .borrow_mut()
            .run(
                "CREATE TABLE contacts (
                    id INTEGER PRIMARY KEY NOT NULL,
                    name TEXT NOT NULL,
                    email TEXT
                )",
            )
            .unwrap();
        cursor
    }

    fn contacts(cursor: &SharedCursor) -> Table {
        Table::new(
            "contacts",
            cursor.clone(),
            vec![
                ColumnSpec::new("id").source("id").key(),
                ColumnSpec::new("name").source("name").not_null(),
                ColumnSpec::new("email").source("email"),
            ],
        )
        .unwrap()
    }

    fn contact(id: i64, name: &str) -> Record {
        Record::from_pairs([
            ("id", Value::Integer(id)),
            ("name", Value::Text(name.to_string())),
        ])
    }

    #[test]
    fn generated_dml_shapes() {
        let cursor = cursor();
        let mut table = contacts(&cursor);

        insta::assert_snapshot!(table.sql(Op::Insert).unwrap(),
            @"INSERT INTO contacts (id, name, email) VALUES (?, ?, ?)");
        insta::assert_snapshot!(table.sql(Op::Update).unwrap(),
            @"UPDATE contacts SET name = ?, email = ? WHERE id = ?");
        insta::assert_snapshot!(table.sql(Op::Delete).unwrap(),
            @"DELETE FROM contacts WHERE id = ?");
        insta::assert_snapshot!(table.sql(Op::Select).unwrap(),
            @"SELECT id, name, email FROM contacts WHERE id = ?");
        insta::assert_snapshot!(table.sql(Op::Merge).unwrap(),
            @"INSERT INTO contacts (id, name, email) VALUES (?, ?, ?) ON CONFLICT (id) DO UPDATE SET name = excluded.name, email = excluded.email");
    }

    #[test]
    fn db_expressions_shape_the_dml() {
        let cursor = cursor();
        cursor
            .borrow_mut()
            .run(
                "CREATE TABLE audited (
                    id INTEGER PRIMARY KEY NOT NULL,
                    email TEXT,
                    loaded_at TEXT
                )",
            )
            .unwrap();

        let mut table = Table::new(
            "audited",
            cursor,
            vec![
                ColumnSpec::new("id").source("id").key(),
                ColumnSpec::new("email").source("email").db_expr("LOWER(#)"),
                ColumnSpec::new("loaded_at").db_expr("CURRENT_TIMESTAMP").no_update(),
            ],
        )
        .unwrap();

        insta::assert_snapshot!(table.sql(Op::Insert).unwrap(),
            @"INSERT INTO audited (id, email, loaded_at) VALUES (?, LOWER(?), CURRENT_TIMESTAMP)");
        insta::assert_snapshot!(table.sql(Op::Update).unwrap(),
            @"UPDATE audited SET email = LOWER(?) WHERE id = ?");

        table
            .set_values(&Record::from_pairs([
                ("id", Value::Integer(1)),
                ("email", Value::Text("A@B.COM".to_string())),
            ]))
            .unwrap();
        table.execute_strict(Op::Insert).unwrap();

        table.set_value("id", 1).unwrap();
        let row = table.fetch().unwrap().unwrap();
        assert_eq!(row.get("email"), Some(&Value::Text("a@b.com".to_string())));
        assert_ne!(row.get("loaded_at"), Some(&Value::Null));
    }

    #[test]
    fn readiness_bitmap_tracks_required_columns() {
        let cursor = cursor();
        let mut table = contacts(&cursor);

        table.set_values(&contact(1, "Aang")).unwrap();
        assert!(table.is_ready(Op::Insert));
        assert!(table.is_ready(Op::Update));
        assert!(table.reqs_met(Op::Insert));

        // `name` is missing: INSERT requirements fail, UPDATE (keys only)
        // still holds.
        table
            .set_values(&Record::from_pairs([
                ("id", Value::Integer(1)),
                ("email", Value::Text("x".to_string())),
            ]))
            .unwrap();
        assert!(!table.is_ready(Op::Insert));
        assert!(table.is_ready(Op::Update));
        assert_eq!(table.reqs_missing(Op::Insert), vec!["name".to_string()]);

        let outcome = table.execute(Op::Insert).unwrap();
        assert_eq!(outcome, Outcome::Incomplete);
        assert_eq!(table.counts().incomplete, 1);
        assert_eq!(table.counts().insert, 0);

        let err = table.execute_strict(Op::Insert).unwrap_err();
        insta::assert_snapshot!(err, @"contacts is not ready for insert: missing name");
    }

    #[test]
    fn insert_then_fetch_round_trips() {
        let cursor = cursor();
        let mut table = contacts(&cursor);

        let source = Record::from_pairs([
            ("id", Value::Integer(7)),
            ("name", Value::Text("Toph".to_string())),
            ("email", Value::Text("t@earth.io".to_string())),
        ]);
        table.set_values(&source).unwrap();
        table.execute_strict(Op::Insert).unwrap();
        assert_eq!(table.counts().insert, 1);

        let fetched = table.fetch().unwrap().unwrap();
        assert_eq!(fetched, source);
    }

    #[test]
    fn null_sentinels_and_defaults_apply_in_order() {
        let cursor = cursor();
        let mut table = Table::new(
            "contacts",
            cursor,
            vec![
                ColumnSpec::new("id").source("id").key(),
                ColumnSpec::new("name").source("name").default_value("unknown").not_null(),
                ColumnSpec::new("email").source("email"),
            ],
        )
        .unwrap();

        table
            .set_values(&Record::from_pairs([
                ("id", Value::Integer(1)),
                ("name", Value::Text("<null>".to_string())),
                ("email", Value::Text("NULL".to_string())),
            ]))
            .unwrap();

        // "<null>" normalized to NULL, then the default filled it.
        assert_eq!(table.value("name"), Some(&Value::Text("unknown".to_string())));
        assert_eq!(table.value("email"), Some(&Value::Null));
    }

    #[test]
    fn transform_pipeline_applies_in_order() {
        let cursor = cursor();
        let mut table = Table::new(
            "contacts",
            cursor,
            vec![
                ColumnSpec::new("id").source("id").key(),
                ColumnSpec::new("name")
                    .source("name")
                    .transform("lower")
                    .transform("strip")
                    .transform("maxlen:5")
                    .not_null(),
                ColumnSpec::new("email").source("email"),
            ],
        )
        .unwrap();

        table.set_values(&contact(1, "  HELLO WORLD  ")).unwrap();
        assert_eq!(table.value("name"), Some(&Value::Text("hello".to_string())));
    }

    #[test]
    fn whole_record_functions_see_every_field() {
        let cursor = cursor();
        cursor
            .borrow_mut()
            .run("CREATE TABLE sums (id INTEGER PRIMARY KEY NOT NULL, total INTEGER)")
            .unwrap();

        let mut table = Table::new(
            "sums",
            cursor,
            vec![
                ColumnSpec::new("id").source("id").key(),
                ColumnSpec::new("total").whole_record().function(Transform::record_func(
                    "a_plus_b",
                    |r| {
                        let a = r.field("a").map_err(|e| e.to_string())?;
                        let b = r.field("b").map_err(|e| e.to_string())?;
                        match (a.as_i64(), b.as_i64()) {
                            (Some(a), Some(b)) => Ok(Value::Integer(a + b)),
                            _ => Err("a and b must be integers".to_string()),
                        }
                    },
                )),
            ],
        )
        .unwrap();

        table
            .set_values(&Record::from_pairs([("id", 1), ("a", 2), ("b", 3)]))
            .unwrap();
        assert_eq!(table.value("total"), Some(&Value::Integer(5)));
    }

    #[test]
    fn failing_transforms_count_errors_and_null_the_column() {
        let cursor = cursor();
        let mut table = Table::new(
            "contacts",
            cursor,
            vec![
                ColumnSpec::new("id").source("id").transform("int").key(),
                ColumnSpec::new("name").source("name").not_null(),
                ColumnSpec::new("email").source("email"),
            ],
        )
        .unwrap();

        table
            .set_values(&Record::from_pairs([
                ("id", "not a number"),
                ("name", "Aang"),
            ]))
            .unwrap();
        assert_eq!(table.counts().error, 1);
        assert_eq!(table.value("id"), Some(&Value::Null));
        // The nulled key column leaves every keyed operation unready.
        assert!(!table.is_ready(Op::Update));
        assert!(!table.is_ready(Op::Insert));
    }

    #[test]
    fn update_and_delete_by_key() {
        let cursor = cursor();
        let mut table = contacts(&cursor);

        for (id, name) in [(1, "Aang"), (2, "Katara")] {
            table.set_values(&contact(id, name)).unwrap();
            table.execute_strict(Op::Insert).unwrap();
        }

        table.set_values(&contact(2, "Toph")).unwrap();
        table.execute_strict(Op::Update).unwrap();
        assert_eq!(table.counts().update, 1);

        let row = table.fetch().unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::Text("Toph".to_string())));

        table.execute_strict(Op::Delete).unwrap();
        assert_eq!(table.counts().delete, 1);
        assert_eq!(table.fetch().unwrap(), None);
    }

    #[test]
    fn merge_upserts_by_key() {
        let cursor = cursor();
        let mut table = contacts(&cursor);

        table.set_values(&contact(1, "Aang")).unwrap();
        table.execute_strict(Op::Insert).unwrap();

        // Existing key updates, new key inserts; both count as merges.
        for (id, name) in [(1, "Avatar Aang"), (2, "Sokka")] {
            table.set_values(&contact(id, name)).unwrap();
            table.execute_strict(Op::Merge).unwrap();
        }
        assert_eq!(table.counts().merge, 2);

        table.set_value("id", 1).unwrap();
        let row = table.fetch().unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::Text("Avatar Aang".to_string())));
    }

    #[test]
    fn lookup_transforms_resolve_against_reference_tables() {
        let cursor = cursor();
        cursor
            .borrow_mut()
            .run(
                "CREATE TABLE states (
                    name TEXT PRIMARY KEY NOT NULL,
                    code TEXT NOT NULL
                )",
            )
            .unwrap();
        cursor
            .borrow_mut()
            .run("INSERT INTO states (name, code) VALUES ('Texas', 'TX'), ('Ohio', 'OH')")
            .unwrap();
        cursor
            .borrow_mut()
            .run(
                "CREATE TABLE addresses (
                    id INTEGER PRIMARY KEY NOT NULL,
                    state TEXT
                )",
            )
            .unwrap();

        let mut table = Table::new(
            "addresses",
            cursor,
            vec![
                ColumnSpec::new("id").source("id").key(),
                // The lookup keys off the record's `name` field, which names
                // a column of the reference table.
                ColumnSpec::new("state")
                    .source("name")
                    .transform("lookup:states:name:code:preload"),
            ],
        )
        .unwrap();

        table
            .set_values(&Record::from_pairs([
                ("id", Value::Integer(1)),
                ("name", Value::Text("Ohio".to_string())),
            ]))
            .unwrap();
        assert_eq!(table.value("state"), Some(&Value::Text("OH".to_string())));

        table
            .set_values(&Record::from_pairs([
                ("id", Value::Integer(2)),
                ("name", Value::Text("Atlantis".to_string())),
            ]))
            .unwrap();
        assert_eq!(table.value("state"), Some(&Value::Null));
    }

    #[test]
    fn missing_columns_are_named() {
        let cursor = cursor();
        let mut table = contacts(&cursor);
        assert!(matches!(
            table.set_value("phone", 1).unwrap_err(),
            Error::NoSuchColumn { .. }
        ));
    }
}
