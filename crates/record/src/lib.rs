#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("column {key} is not present in the record")]
    KeyNotFound { key: String },
    #[error("schema has {names} column names but the row has {values} values")]
    Arity { names: usize, values: usize },
}

mod record;
mod schema;
mod value;

pub use record::Record;
pub use schema::{normalize, Schema};
pub use value::Value;
