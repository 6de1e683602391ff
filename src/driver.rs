//! Seam between the connection manager and a concrete database driver.
//!
//! The manager never talks to a wire protocol itself. A [`Driver`] builds an
//! [`Engine`] from a connection URL; an engine hands out managed
//! [`Connection`]s for ordinary statements and [`RawConnection`]s for
//! cursor-level stored procedure calls. Every connection is wrapped in a
//! [`ConnectionGuard`] so it is closed on all exit paths.

use std::{
    error::Error as StdError,
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::data::Value;
use crate::dataset::Dataset;
use crate::schema::TableSchema;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error reported by a driver. The message is surfaced verbatim.
#[derive(Debug)]
pub struct DriverError {
    message: String,
    source: Option<BoxError>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for DriverError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

/// Metadata returned by a statement that produces no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub rows_affected: u64,
    pub last_insert_id: Option<u64>,
}

/// Everything a cursor reports after running a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorResult {
    pub rows_affected: u64,
    /// Column names from the cursor description; `None` when the statement
    /// produced no result set.
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Value>>,
}

pub trait Driver: Send + Sync {
    fn create_engine(&self, url: &str) -> Result<Arc<dyn Engine>, DriverError>;
}

/// Reusable connection factory bound to a single database URL.
pub trait Engine: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>, DriverError>;

    fn raw_connect(&self) -> Result<Box<dyn RawConnection>, DriverError>;

    /// Releases every resource held by the engine. Called at most once per
    /// cached handle; the handle is not used afterwards.
    fn dispose(&self) -> Result<(), DriverError>;
}

pub trait Close {
    fn close(self: Box<Self>) -> Result<(), DriverError>;
}

pub trait Connection: Close + Send {
    fn has_table(&mut self, table: &str) -> Result<bool, DriverError>;

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Dataset, DriverError>;

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecutionSummary, DriverError>;

    /// Bulk-inserts every row of `dataset` into an existing table whose
    /// columns follow `schema`. Returns the number of rows written.
    fn insert_rows(
        &mut self,
        table: &str,
        dataset: &Dataset,
        schema: &TableSchema,
        chunk_size: Option<usize>,
    ) -> Result<u64, DriverError>;
}

/// Driver-native connection with cursor-level access.
pub trait RawConnection: Close + Send {
    fn call(&mut self, sql: &str, params: &[Value]) -> Result<CursorResult, DriverError>;

    fn commit(&mut self) -> Result<(), DriverError>;
}

/// Owns an open connection and closes it when dropped.
pub struct ConnectionGuard<C: ?Sized + Close> {
    inner: Option<Box<C>>,
}

impl<C: ?Sized + Close> ConnectionGuard<C> {
    pub fn new(inner: Box<C>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Closes now and reports the outcome instead of logging it.
    pub fn close(mut self) -> Result<(), DriverError> {
        match self.inner.take() {
            Some(conn) => conn.close(),
            None => Ok(()),
        }
    }
}

impl<C: ?Sized + Close> Deref for ConnectionGuard<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.inner
            .as_deref()
            .expect("connection is present until the guard is consumed")
    }
}

impl<C: ?Sized + Close> DerefMut for ConnectionGuard<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner
            .as_deref_mut()
            .expect("connection is present until the guard is consumed")
    }
}

impl<C: ?Sized + Close> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.inner.take() {
            if let Err(err) = conn.close() {
                warn!("Failed to close database connection: {err}");
            }
        }
    }
}

impl<C: ?Sized + Close> fmt::Debug for ConnectionGuard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("open", &self.inner.is_some())
            .finish()
    }
}
