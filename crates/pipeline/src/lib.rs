mod column;
mod lookup;
mod op;
mod table;
mod transform;

pub use column::{Column, ColumnSpec, DbExpr, Participation, Source, SourceSpec};
pub use lookup::{CacheMode, Lookup, Validate};
pub use op::{Counts, Op};
pub use table::{Outcome, Table};
pub use transform::{RecordFn, Transform, TransformError, ValueFn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown transform {spec:?}")]
    UnknownTransform { spec: String },
    #[error("transform {spec:?}: {reason}")]
    InvalidTransform { spec: String, reason: String },
    #[error("lookup against {table} is missing key column(s) {}", .missing.join(", "))]
    LookupKeysMissing { table: String, missing: Vec<String> },
    #[error("{table} is not ready for {op}: missing {}", .missing.join(", "))]
    ReqsNotMet {
        table: String,
        op: Op,
        missing: Vec<String>,
    },
    #[error("column {column} db_expr must contain at most one '#' placeholder")]
    DbExpr { column: String },
    #[error("column {column} sources the whole record; its first transform must be a record function")]
    RecordFnPlacement { column: String },
    #[error("table {table} has no column named {column}")]
    NoSuchColumn { table: String, column: String },
    #[error("no columns of {table} participate in {op}")]
    NoColumns { table: String, op: Op },
    #[error("{table} has no key columns; {op} requires a key predicate")]
    NoKeyColumns { table: String, op: Op },
    #[error("driver has no native upsert; merge through the bulk driver's temp-table strategy")]
    MergeUnsupported,
    #[error(transparent)]
    Cursor(#[from] drivers::Error),
    #[error(transparent)]
    Record(#[from] record::Error),
}
