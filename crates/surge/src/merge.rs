use itertools::Itertools;
use paramstyle::Payload;
use pipeline::{Column, Counts, Op, Table};
use record::{normalize, Record};

use crate::surge::{OnError, Progress, Surge, TxMode};
use crate::Error;

// The merge fallback for databases without a native upsert: stage each batch
// into a session temp table mirroring the target's merge columns, update
// matching target rows from the staged batch, insert the rows with no match,
// and clear the stage. The temp table is dropped on every exit path.
pub(crate) fn via_temp_table<I>(surge: &mut Surge, source: I) -> Result<Progress, Error>
where
    I: IntoIterator<Item = Record>,
{
    let sql = TempMergeSql::generate(surge.table())?;
    let baseline = surge.table.counts();
    let mut processed = 0u64;

    // Temp table management failures are fatal to the run.
    run_ddl(surge, &sql.create).map_err(|err| Error::TempTable {
        table: sql.temp.clone(),
        err,
    })?;
    tracing::debug!(temp = %sql.temp, "created merge stage table");

    if surge.tx_mode == TxMode::WholeRun {
        let begin_result = surge.table.cursor().borrow().begin();
        if let Err(err) = begin_result {
            drop_stage(surge, &sql);
            return Err(err.into());
        }
    }

    let result = drive(surge, &sql, source, &baseline, &mut processed);
    let settled = surge.settle_run_tx(&result);

    // Drop the stage on success and failure paths both.
    drop_stage(surge, &sql);

    result?;
    settled?;
    let progress = surge.snapshot(&baseline, processed);
    surge.emit(&progress);
    Ok(progress)
}

fn drive<I>(
    surge: &mut Surge,
    sql: &TempMergeSql,
    source: I,
    baseline: &Counts,
    processed: &mut u64,
) -> Result<(), Error>
where
    I: IntoIterator<Item = Record>,
{
    let stage = surge.table.cursor().borrow_mut().statement(&sql.stage)?;
    let mut batch: Vec<Payload> = Vec::new();

    for record in source {
        let errors_before = surge.table.counts().error;
        surge.table.set_values(&record)?;
        *processed += 1;

        if surge.table.counts().error > errors_before {
            if surge.on_error == OnError::Abort {
                return Err(Error::Aborted {
                    row: *processed,
                    reason: "transform error".to_string(),
                });
            }
            surge.emit_snapshot(baseline, *processed);
            continue;
        }

        if !surge.table.is_ready(Op::Merge) {
            surge.table.mark_incomplete();
            surge.emit_snapshot(baseline, *processed);
            continue;
        }

        batch.push(surge.table.bind(&stage));
        if batch.len() >= surge.batch_size {
            flush(surge, sql, &stage, &mut batch, baseline, *processed)?;
        }
    }

    flush(surge, sql, &stage, &mut batch, baseline, *processed)
}

fn flush(
    surge: &mut Surge,
    sql: &TempMergeSql,
    stage: &paramstyle::Statement,
    batch: &mut Vec<Payload>,
    baseline: &Counts,
    processed: u64,
) -> Result<(), Error> {
    if batch.is_empty() {
        return Ok(());
    }
    if surge.tx_mode == TxMode::PerBatch {
        surge.table.cursor().borrow().begin()?;
    }

    let outcome = surge
        .table
        .cursor()
        .borrow_mut()
        .execute_payload_batch(stage.sql(), batch);

    let staged: u64 = match outcome {
        Ok(_) => batch.len() as u64,
        Err(err) => {
            if surge.on_error == OnError::Abort {
                if surge.tx_mode == TxMode::PerBatch {
                    let _ = surge.table.cursor().borrow().rollback();
                }
                return Err(err.into());
            }

            tracing::warn!(%err, rows = batch.len(), "stage batch failed; isolating per row");
            let mut staged = 0;
            for payload in batch.iter() {
                let applied = surge
                    .table
                    .cursor()
                    .borrow_mut()
                    .execute_payload(stage.sql(), payload);
                match applied {
                    Ok(_) => staged += 1,
                    Err(row_err) => {
                        surge.table.mark_error();
                        tracing::warn!(err = %row_err, "row isolated from failed stage batch");
                    }
                }
            }
            staged
        }
    };

    if staged > 0 {
        // One merge per batch: update matches, insert the rest.
        if let Some(update) = &sql.update {
            run_ddl(surge, update)?;
        }
        run_ddl(surge, &sql.insert_missing)?;
        surge.table.mark_applied(Op::Merge, staged);
    }
    run_ddl(surge, &sql.clear)?;

    if surge.tx_mode == TxMode::PerBatch {
        surge.table.cursor().borrow().commit()?;
    }

    batch.clear();
    surge.emit_snapshot(baseline, processed);
    Ok(())
}

fn run_ddl(surge: &mut Surge, sql: &str) -> Result<(), drivers::Error> {
    surge.table.cursor().borrow_mut().run(sql)?;
    Ok(())
}

fn drop_stage(surge: &mut Surge, sql: &TempMergeSql) {
    if let Err(err) = run_ddl(surge, &sql.drop) {
        tracing::warn!(temp = %sql.temp, %err, "failed to drop merge stage table");
    }
}

// The statements of one fallback run, generated once in canonical style.
struct TempMergeSql {
    temp: String,
    create: String,
    stage: String,
    update: Option<String>,
    insert_missing: String,
    clear: String,
    drop: String,
}

impl TempMergeSql {
    fn generate(table: &Table) -> Result<Self, Error> {
        let target = table.name();
        let columns: Vec<&Column> = table
            .columns()
            .iter()
            .filter(|c| c.participation(Op::Merge).in_sql)
            .collect();
        let keys: Vec<&Column> = table.columns().iter().filter(|c| c.is_key()).collect();

        if columns.is_empty() {
            return Err(pipeline::Error::NoColumns {
                table: target.to_string(),
                op: Op::Merge,
            }
            .into());
        }
        if keys.is_empty() {
            return Err(pipeline::Error::NoKeyColumns {
                table: target.to_string(),
                op: Op::Merge,
            }
            .into());
        }

        let temp = format!("merge_stage_{}", normalize(target));
        let names = columns.iter().map(|c| c.name()).join(", ");

        let create =
            format!("CREATE TEMPORARY TABLE {temp} AS SELECT {names} FROM {target} WHERE 0 = 1");

        let stage = format!(
            "INSERT INTO {temp} ({names}) VALUES ({})",
            columns.iter().map(|c| c.value_sql()).join(", "),
        );

        let key_match = |left: &str| {
            keys.iter()
                .map(|c| format!("{left}.{0} = src.{0}", c.name()))
                .join(" AND ")
        };

        // The update side of the merge excludes keys and no-update columns.
        let sets = columns
            .iter()
            .filter(|c| !c.is_key() && !c.is_no_update())
            .map(|c| format!("{0} = src.{0}", c.name()))
            .join(", ");
        let update = if sets.is_empty() {
            None
        } else {
            Some(format!(
                "UPDATE {target} SET {sets} FROM {temp} AS src WHERE {}",
                key_match(target),
            ))
        };

        let insert_missing = format!(
            "INSERT INTO {target} ({names}) SELECT {} FROM {temp} AS src \
             WHERE NOT EXISTS (SELECT 1 FROM {target} AS t WHERE {})",
            columns.iter().map(|c| format!("src.{}", c.name())).join(", "),
            key_match("t"),
        );

        Ok(Self {
            clear: format!("DELETE FROM {temp}"),
            drop: format!("DROP TABLE IF EXISTS {temp}"),
            temp,
            create,
            stage,
            update,
            insert_missing,
        })
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use drivers::{Capabilities, Cursor, Driver, DriverCursor, DriverError, SharedCursor, SqliteDriver};
    use paramstyle::ParamStyle;
    use pipeline::{ColumnSpec, Table};
    use record::{Record, Value};

    use crate::{Progress, Surge};

    // SQLite pretending it has no native upsert, to force the temp-table
    // strategy.
    struct NoUpsert(SqliteDriver);

    impl Driver for NoUpsert {
        fn param_style(&self) -> ParamStyle {
            self.0.param_style()
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                native_upsert: false,
                temp_tables: true,
            }
        }

        fn open_cursor(&self) -> Result<Box<dyn DriverCursor>, DriverError> {
            self.0.open_cursor()
        }

        fn begin(&self) -> Result<(), DriverError> {
            self.0.begin()
        }

        fn commit(&self) -> Result<(), DriverError> {
            self.0.commit()
        }

        fn rollback(&self) -> Result<(), DriverError> {
            self.0.rollback()
        }
    }

    fn seeded(native: bool) -> SharedCursor {
        let sqlite = SqliteDriver::open_in_memory().unwrap();
        let cursor = if native {
            Cursor::shared(Rc::new(sqlite)).unwrap()
        } else {
            Cursor::shared(Rc::new(NoUpsert(sqlite))).unwrap()
        };
        {
            let mut c = cursor.borrow_mut();
            c.run("CREATE TABLE t (id INTEGER PRIMARY KEY NOT NULL, v TEXT NOT NULL)")
                .unwrap();
            c.run("INSERT INTO t (id, v) VALUES (1, 'a'), (2, 'b')")
                .unwrap();
        }
        cursor
    }

    fn table(cursor: &SharedCursor) -> Table {
        Table::new(
            "t",
            cursor.clone(),
            vec![
                ColumnSpec::new("id").source("id").key(),
                ColumnSpec::new("v").source("v").not_null(),
            ],
        )
        .unwrap()
    }

    fn final_state(cursor: &SharedCursor) -> Vec<(i64, String)> {
        let mut c = cursor.borrow_mut();
        c.run("SELECT id, v FROM t ORDER BY id").unwrap();
        c.fetchall()
            .unwrap()
            .into_iter()
            .map(|r| {
                (
                    r.at(0).and_then(Value::as_i64).unwrap(),
                    r.at(1).and_then(|v| v.as_str().map(str::to_string)).unwrap(),
                )
            })
            .collect()
    }

    fn source() -> Vec<Record> {
        vec![
            Record::from_pairs([
                ("id", Value::Integer(2)),
                ("v", Value::Text("B".to_string())),
            ]),
            Record::from_pairs([
                ("id", Value::Integer(3)),
                ("v", Value::Text("c".to_string())),
            ]),
        ]
    }

    // Native upsert and the temp-table fallback must land the database in
    // the same final state, with the same counters.
    #[test]
    fn native_and_fallback_merges_are_equivalent() {
        for native in [true, false] {
            let cursor = seeded(native);
            let mut surge = Surge::new(table(&cursor)).batch_size(10);
            let progress = surge.merge(source()).unwrap();

            assert_eq!(
                progress,
                Progress {
                    processed: 2,
                    merged: 2,
                    ..Progress::default()
                },
                "native = {native}"
            );
            assert_eq!(
                final_state(&cursor),
                vec![
                    (1, "a".to_string()),
                    (2, "B".to_string()),
                    (3, "c".to_string()),
                ],
                "native = {native}"
            );

            // The merge stage is gone at end of run.
            let counts = surge.table().counts();
            assert_eq!(counts.merge, 2);
            assert_eq!(counts.insert, 0);
            assert_eq!(counts.update, 0);
            {
                let mut c = cursor.borrow_mut();
                assert!(c.run("SELECT * FROM merge_stage_t").is_err(), "native = {native}");
            }
        }
    }

    #[test]
    fn fallback_merges_across_many_batches() {
        let cursor = seeded(false);
        let mut surge = Surge::new(table(&cursor)).batch_size(3);

        let source: Vec<Record> = (1..=20)
            .map(|i| {
                Record::from_pairs([
                    ("id", Value::Integer(i)),
                    ("v", Value::Text(format!("v{i}"))),
                ])
            })
            .collect();
        let progress = surge.merge(source).unwrap();

        assert_eq!(progress.merged, 20);
        assert_eq!(progress.processed, 20);
        let state = final_state(&cursor);
        assert_eq!(state.len(), 20);
        assert_eq!(state[0], (1, "v1".to_string()));
        assert_eq!(state[19], (20, "v20".to_string()));
    }

    #[test]
    fn no_update_columns_survive_a_merge() {
        let cursor = seeded(false);
        cursor
            .borrow_mut()
            .run("ALTER TABLE t ADD COLUMN created TEXT")
            .unwrap();
        cursor
            .borrow_mut()
            .run("UPDATE t SET created = 'then'")
            .unwrap();

        let table = Table::new(
            "t",
            cursor.clone(),
            vec![
                ColumnSpec::new("id").source("id").key(),
                ColumnSpec::new("v").source("v").not_null(),
                ColumnSpec::new("created").source("created").no_update(),
            ],
        )
        .unwrap();

        let mut surge = Surge::new(table);
        surge
            .merge(vec![Record::from_pairs([
                ("id", Value::Integer(1)),
                ("v", Value::Text("A".to_string())),
                ("created", Value::Text("now".to_string())),
            ])])
            .unwrap();

        let mut c = cursor.borrow_mut();
        c.run("SELECT v, created FROM t WHERE id = 1").unwrap();
        let row = c.fetchone().unwrap().unwrap();
        // v updated; created kept its original value.
        assert_eq!(row.get("v"), Some(&Value::Text("A".to_string())));
        assert_eq!(row.get("created"), Some(&Value::Text("then".to_string())));
    }
}
