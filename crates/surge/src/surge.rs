use paramstyle::Payload;
use pipeline::{Counts, Op, Table};
use record::Record;

use crate::{merge, Error};

/// How a bulk run uses transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// No transaction management; the driver's autocommit applies.
    None,
    /// One transaction around the whole run, rolled back if the run aborts.
    WholeRun,
    /// One transaction per flushed batch.
    PerBatch,
}

/// What to do when a row fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// Count the failure and keep going; batch-level database failures fall
    /// back to per-row execution to isolate offenders.
    Continue,
    /// Abort the run on the first failing row or batch.
    Abort,
}

/// Cumulative run accounting, delivered to the progress sink after every
/// flush and at end of run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Progress {
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub merged: u64,
    pub incomplete: u64,
    pub errors: u64,
}

pub type ProgressSink = Box<dyn FnMut(&Progress)>;

/// Surge drives a Table over a streaming source of records with batched
/// execution, per-row error isolation, and operation-specific strategies.
/// Rows are processed in source order; database side-effects happen in batch
/// issuance order.
pub struct Surge {
    pub(crate) table: Table,
    pub(crate) batch_size: usize,
    pub(crate) tx_mode: TxMode,
    pub(crate) on_error: OnError,
    pub(crate) progress: Option<ProgressSink>,
}

impl Surge {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            batch_size: 500,
            tx_mode: TxMode::None,
            on_error: OnError::Continue,
            progress: None,
        }
    }

    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows.max(1);
        self
    }

    pub fn transactions(mut self, mode: TxMode) -> Self {
        self.tx_mode = mode;
        self
    }

    pub fn on_error(mut self, policy: OnError) -> Self {
        self.on_error = policy;
        self
    }

    pub fn progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Hand the table back, e.g. to read its counters after a run.
    pub fn into_table(self) -> Table {
        self.table
    }

    pub fn insert<I>(&mut self, source: I) -> Result<Progress, Error>
    where
        I: IntoIterator<Item = Record>,
    {
        self.run(Op::Insert, source)
    }

    pub fn update<I>(&mut self, source: I) -> Result<Progress, Error>
    where
        I: IntoIterator<Item = Record>,
    {
        self.run(Op::Update, source)
    }

    pub fn delete<I>(&mut self, source: I) -> Result<Progress, Error>
    where
        I: IntoIterator<Item = Record>,
    {
        self.run(Op::Delete, source)
    }

    /// Upsert every source row. Uses the database's native merge when the
    /// driver has one, else the temp-table strategy. The semantic merge
    /// counter covers inserted and updated rows both.
    pub fn merge<I>(&mut self, source: I) -> Result<Progress, Error>
    where
        I: IntoIterator<Item = Record>,
    {
        let caps = self.table.cursor().borrow().capabilities();
        if caps.native_upsert {
            self.run(Op::Merge, source)
        } else if caps.temp_tables {
            merge::via_temp_table(self, source)
        } else {
            Err(Error::MergeUnsupported)
        }
    }

    fn run<I>(&mut self, op: Op, source: I) -> Result<Progress, Error>
    where
        I: IntoIterator<Item = Record>,
    {
        let baseline = self.table.counts();
        let mut processed = 0u64;
        let mut batch: Vec<Payload> = Vec::new();

        if self.tx_mode == TxMode::WholeRun {
            self.table.cursor().borrow().begin()?;
        }

        let result = self.drive(op, source, &baseline, &mut processed, &mut batch);
        self.settle_run_tx(&result)?;
        result?;

        let progress = self.snapshot(&baseline, processed);
        self.emit(&progress);
        Ok(progress)
    }

    fn drive<I>(
        &mut self,
        op: Op,
        source: I,
        baseline: &Counts,
        processed: &mut u64,
        batch: &mut Vec<Payload>,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = Record>,
    {
        for record in source {
            let errors_before = self.table.counts().error;
            self.table.set_values(&record)?;
            *processed += 1;

            if self.table.counts().error > errors_before {
                // A transform failed on this row; the table counted it.
                if self.on_error == OnError::Abort {
                    return Err(Error::Aborted {
                        row: *processed,
                        reason: "transform error".to_string(),
                    });
                }
                self.emit_snapshot(baseline, *processed);
                continue;
            }

            if !self.table.is_ready(op) {
                self.table.mark_incomplete();
                self.emit_snapshot(baseline, *processed);
                continue;
            }

            batch.push(self.table.payload(op)?);
            if batch.len() >= self.batch_size {
                self.flush(op, batch, baseline, *processed)?;
            }
        }

        self.flush(op, batch, baseline, *processed)
    }

    fn flush(
        &mut self,
        op: Op,
        batch: &mut Vec<Payload>,
        baseline: &Counts,
        processed: u64,
    ) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.tx_mode == TxMode::PerBatch {
            self.table.cursor().borrow().begin()?;
        }

        let statement = self.table.statement(op)?;
        let outcome = self
            .table
            .cursor()
            .borrow_mut()
            .execute_payload_batch(statement.sql(), batch);

        match outcome {
            Ok(_) => self.table.mark_applied(op, batch.len() as u64),
            Err(err) => {
                if self.on_error == OnError::Abort {
                    if self.tx_mode == TxMode::PerBatch {
                        let _ = self.table.cursor().borrow().rollback();
                    }
                    return Err(err.into());
                }

                // The batch rolled back as a unit; replay it row by row to
                // isolate the offenders.
                tracing::warn!(%err, rows = batch.len(), "batch failed; isolating per row");
                for payload in batch.iter() {
                    let applied = self
                        .table
                        .cursor()
                        .borrow_mut()
                        .execute_payload(statement.sql(), payload);
                    match applied {
                        Ok(_) => self.table.mark_applied(op, 1),
                        Err(row_err) => {
                            self.table.mark_error();
                            tracing::warn!(err = %row_err, "row isolated from failed batch");
                        }
                    }
                }
            }
        }

        if self.tx_mode == TxMode::PerBatch {
            self.table.cursor().borrow().commit()?;
        }

        batch.clear();
        self.emit_snapshot(baseline, processed);
        Ok(())
    }

    pub(crate) fn settle_run_tx<T>(&mut self, result: &Result<T, Error>) -> Result<(), Error> {
        if self.tx_mode != TxMode::WholeRun {
            return Ok(());
        }
        match result {
            Ok(_) => self.table.cursor().borrow().commit()?,
            Err(_) => {
                let _ = self.table.cursor().borrow().rollback();
            }
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self, baseline: &Counts, processed: u64) -> Progress {
        let counts = self.table.counts();
        Progress {
            processed,
            inserted: counts.insert - baseline.insert,
            updated: counts.update - baseline.update,
            deleted: counts.delete - baseline.delete,
            merged: counts.merge - baseline.merge,
            incomplete: counts.incomplete - baseline.incomplete,
            errors: counts.error - baseline.error,
        }
    }

    pub(crate) fn emit_snapshot(&mut self, baseline: &Counts, processed: u64) {
        if self.progress.is_none() {
            return;
        }
        let progress = self.snapshot(baseline, processed);
        self.emit(&progress);
    }

    pub(crate) fn emit(&mut self, progress: &Progress) {
        if let Some(sink) = &mut self.progress {
            sink(progress);
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use drivers::{Cursor, SharedCursor, SqliteDriver};
    use pipeline::{ColumnSpec, Table};
    use record::{Record, Value};

    use super::{OnError, Progress, Surge, TxMode};

    fn contacts_cursor() -> SharedCursor {
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

    fn contacts_table(cursor: &SharedCursor) -> Table {
        Table::new(
            "contacts",
            cursor.clone(),
            vec![
                ColumnSpec::new("id").source("id").transform("int").key(),
                ColumnSpec::new("name").source("name").not_null(),
                ColumnSpec::new("email").source("email"),
            ],
        )
        .unwrap()
    }

    fn row(id: i64, name: &str) -> Record {
        Record::from_pairs([
            ("id", Value::Integer(id)),
            ("name", Value::Text(name.to_string())),
        ])
    }

    fn count_rows(cursor: &SharedCursor) -> i64 {
        let mut c = cursor.borrow_mut();
        c.run("SELECT COUNT(*) FROM contacts").unwrap();
        c.fetchone()
            .unwrap()
            .unwrap()
            .at(0)
            .and_then(Value::as_i64)
            .unwrap()
    }

    #[test]
    fn bulk_insert_batches_and_counts() {
        let cursor = contacts_cursor();
        let mut surge = Surge::new(contacts_table(&cursor)).batch_size(10);

        let source: Vec<Record> = (1..=25).map(|i| row(i, "person")).collect();
        let progress = surge.insert(source).unwrap();

        assert_eq!(
            progress,
            Progress {
                processed: 25,
                inserted: 25,
                ..Progress::default()
            }
        );
        assert_eq!(count_rows(&cursor), 25);
    }

    #[test]
    fn incomplete_and_failing_rows_are_accounted() {
        let cursor = contacts_cursor();
        let mut surge = Surge::new(contacts_table(&cursor)).batch_size(10);

        let mut source = vec![row(1, "Aang"), row(2, "Katara")];
        // Missing name: incomplete for INSERT.
        source.push(Record::from_pairs([("id", Value::Integer(3))]));
        // Unparseable id: transform error nulls the key.
        source.push(Record::from_pairs([
            ("id", Value::Text("seven".to_string())),
            ("name", Value::Text("Toph".to_string())),
        ]));
        source.push(row(5, "Sokka"));

        let progress = surge.insert(source).unwrap();
        assert_eq!(
            progress,
            Progress {
                processed: 5,
                inserted: 3,
                incomplete: 1,
                errors: 1,
                ..Progress::default()
            }
        );
        // Counter arithmetic: applied + incomplete + errors == processed.
        assert_eq!(
            progress.inserted + progress.incomplete + progress.errors,
            progress.processed
        );
    }

    #[test]
    fn batch_failures_fall_back_to_row_isolation() {
        let cursor = contacts_cursor();
        let mut surge = Surge::new(contacts_table(&cursor)).batch_size(10);

        // Row 2 collides with row 1 on the primary key; the batch fails and
        // replays per row, isolating only the duplicate.
        let source = vec![row(1, "Aang"), row(1, "Impostor"), row(2, "Katara")];
        let progress = surge.insert(source).unwrap();

        assert_eq!(
            progress,
            Progress {
                processed: 3,
                inserted: 2,
                errors: 1,
                ..Progress::default()
            }
        );
        assert_eq!(count_rows(&cursor), 2);
    }

    #[test]
    fn abort_policy_stops_and_rolls_back_the_run() {
        let cursor = contacts_cursor();
        let mut surge = Surge::new(contacts_table(&cursor))
            .batch_size(1)
            .transactions(TxMode::WholeRun)
            .on_error(OnError::Abort);

        let source = vec![row(1, "Aang"), row(1, "Impostor"), row(2, "Katara")];
        surge.insert(source).unwrap_err();

        // The whole-run transaction rolled back: nothing persisted.
        assert_eq!(count_rows(&cursor), 0);
    }

    #[test]
    fn bulk_update_and_delete_by_key() {
        let cursor = contacts_cursor();
        let mut surge = Surge::new(contacts_table(&cursor)).batch_size(2);

        surge
            .insert((1..=4).map(|i| row(i, "old")).collect::<Vec<_>>())
            .unwrap();

        let progress = surge
            .update(vec![row(1, "new"), row(3, "new")])
            .unwrap();
        assert_eq!(progress.updated, 2);

        {
            let mut c = cursor.borrow_mut();
            c.run("SELECT COUNT(*) FROM contacts WHERE name = 'new'")
                .unwrap();
            let n = c.fetchone().unwrap().unwrap().at(0).and_then(Value::as_i64);
            assert_eq!(n, Some(2));
        }

        let progress = surge
            .delete(vec![row(2, "ignored"), row(4, "ignored")])
            .unwrap();
        assert_eq!(progress.deleted, 2);
        assert_eq!(count_rows(&cursor), 2);
    }

    #[test]
    fn progress_sink_sees_cumulative_totals() {
        let cursor = contacts_cursor();
        let seen: Rc<RefCell<Vec<Progress>>> = Rc::default();
        let sink = seen.clone();

        let mut surge = Surge::new(contacts_table(&cursor))
            .batch_size(2)
            .progress(Box::new(move |p| sink.borrow_mut().push(*p)));

        surge
            .insert((1..=5).map(|i| row(i, "p")).collect::<Vec<_>>())
            .unwrap();

        let seen = seen.borrow();
        // Three batch flushes (2 + 2 + 1) plus the end-of-run report.
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0].processed <= w[1].processed));
        assert_eq!(
            seen.last().unwrap(),
            &Progress {
                processed: 5,
                inserted: 5,
                ..Progress::default()
            }
        );
    }
}
