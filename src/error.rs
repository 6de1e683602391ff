use thiserror::Error;

use crate::dataset::DatasetError;
use crate::dialect::DialectKind;
use crate::driver::DriverError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Every connection attempt allowed by the retry policy failed.
    #[error("Database connection failed after {attempts} attempt(s): {source}")]
    Connection { attempts: u32, source: DriverError },
    /// A statement was rejected by the database (syntax, permissions,
    /// constraints). The driver message is kept as-is.
    #[error(transparent)]
    Statement(#[from] DriverError),
    #[error("{operation} is not supported for {dialect}")]
    Unsupported {
        dialect: DialectKind,
        operation: &'static str,
    },
    #[error("Table '{0}' already exists")]
    TableExists(String),
    #[error("Cannot create table '{0}' from a dataset with no columns")]
    NoColumns(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}
