#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("run aborted at row {row}: {reason}")]
    Aborted { row: u64, reason: String },
    #[error("driver supports neither native upsert nor temporary tables; cannot merge")]
    MergeUnsupported,
    #[error("temp table {table} could not be managed")]
    TempTable {
        table: String,
        #[source]
        err: drivers::Error,
    },
    #[error(transparent)]
    Pipeline(#[from] pipeline::Error),
    #[error(transparent)]
    Cursor(#[from] drivers::Error),
}

mod merge;
mod surge;

pub use surge::{OnError, Progress, ProgressSink, Surge, TxMode};
