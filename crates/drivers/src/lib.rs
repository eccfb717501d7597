#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to translate query")]
    Translate(#[from] paramstyle::Error),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("failed to read SQL file {path}")]
    ReadFile {
        path: String,
        #[source]
        err: std::io::Error,
    },
    #[error(transparent)]
    Record(#[from] record::Error),
    #[error("cursor has no result set to fetch from")]
    NoResultSet,
}

mod cursor;
mod driver;
mod sqlite;

pub use cursor::{Cursor, Prepared, Records, SharedCursor};
pub use driver::{Capabilities, Driver, DriverCursor, DriverError};
pub use sqlite::SqliteDriver;
