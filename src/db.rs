//! Database facade: engine lifecycle, connection retry and the table-level
//! operations built on top of them.
//!
//! Each operation opens exactly one connection, does one unit of work and
//! releases the connection through a [`ConnectionGuard`] on every exit path.
//! Engines are cached per database name and disposed when the `Database` is
//! closed or dropped.

use std::{borrow::Cow, collections::HashMap, fmt, marker::PhantomData, sync::Arc};

use log::{debug, info, warn};

use crate::{
    config::ConnectionConfig,
    data::{self, Value},
    dataset::Dataset,
    dialect::{Dialect, DialectKind, MsSql, MySql, PostgreSql},
    driver::{Close, Connection, ConnectionGuard, Driver, DriverError, Engine, ExecutionSummary, RawConnection},
    engine::{EngineCache, EngineKey},
    error::{Error, Result},
    options::{IfExists, ReadOptions, SaveOptions},
    retry::{self, Sleeper, ThreadSleeper},
    schema::{self, ColumnSchema, TableSchema},
};

pub type MySqlDb = Database<MySql>;
pub type PostgreSqlDb = Database<PostgreSql>;
pub type MsSqlDb = Database<MsSql>;

/// Outcome of [`Database::call_procedure`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProcedureResult {
    RowsAffected(u64),
    Rows(Dataset),
    /// A dataset was requested but the procedure produced no result set.
    NoResultSet,
}

pub struct Database<D: Dialect> {
    config: ConnectionConfig,
    driver: Arc<dyn Driver>,
    engines: EngineCache,
    engine_urls: HashMap<EngineKey, String>,
    sleeper: Arc<dyn Sleeper>,
    _dialect: PhantomData<D>,
}

impl<D: Dialect> Database<D> {
    pub fn new(config: ConnectionConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            config,
            driver,
            engines: EngineCache::new(),
            engine_urls: HashMap::new(),
            sleeper: Arc::new(ThreadSleeper),
            _dialect: PhantomData,
        }
    }

    /// Replaces the blocking wait used between connection attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Uses `url` verbatim for `database` instead of the dialect template.
    pub fn with_engine_url(mut self, database: Option<&str>, url: impl Into<String>) -> Self {
        self.engine_urls
            .insert(EngineKey::for_database(database), url.into());
        self
    }

    pub fn dialect(&self) -> DialectKind {
        D::KIND
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn port(&self) -> u16 {
        self.config.effective_port(D::KIND)
    }

    pub fn engines(&self) -> &EngineCache {
        &self.engines
    }

    pub fn engine_url(&self, database: Option<&str>) -> String {
        self.url_for(&EngineKey::for_database(database))
    }

    fn url_for(&self, key: &EngineKey) -> String {
        match self.engine_urls.get(key) {
            Some(url) => url.clone(),
            None => self.config.engine_url(D::KIND, key.database_name()),
        }
    }

    /// Builds a fresh engine for `database`, disposing any cached one first.
    pub fn get_or_create_engine(&self, database: Option<&str>) -> Result<Arc<dyn Engine>, DriverError> {
        let key = EngineKey::for_database(database);
        let url = self.url_for(&key);
        self.engines.replace(key, || self.driver.create_engine(&url))
    }

    /// Opens a managed connection, retrying under the configured policy.
    pub fn create_connection(
        &self,
        database: Option<&str>,
    ) -> Result<(Arc<dyn Engine>, ConnectionGuard<dyn Connection>)> {
        self.connect_with_retry(database, |engine| engine.connect())
    }

    /// Opens a driver-native connection with cursor access.
    pub fn create_raw_connection(
        &self,
        database: Option<&str>,
    ) -> Result<(Arc<dyn Engine>, ConnectionGuard<dyn RawConnection>)> {
        self.connect_with_retry(database, |engine| engine.raw_connect())
    }

    fn connect_with_retry<C, F>(
        &self,
        database: Option<&str>,
        open: F,
    ) -> Result<(Arc<dyn Engine>, ConnectionGuard<C>)>
    where
        C: ?Sized + Close,
        F: Fn(&dyn Engine) -> Result<Box<C>, DriverError>,
    {
        retry::with_retry(&self.config.retry, self.sleeper.as_ref(), |attempt| -> Result<_, DriverError> {
            debug!(
                "Connecting to {} on {}:{} (attempt {attempt})",
                EngineKey::for_database(database),
                self.config.host,
                self.port()
            );
            let engine = self.get_or_create_engine(database)?;
            let conn = open(engine.as_ref())?;
            Ok((engine, ConnectionGuard::new(conn)))
        })
        .map_err(|exhausted| Error::Connection {
            attempts: exhausted.attempts,
            source: exhausted.last_error,
        })
    }

    pub fn get_databases(&self) -> Result<Vec<String>> {
        let sql = D::KIND.list_databases_sql().ok_or(Error::Unsupported {
            dialect: D::KIND,
            operation: "Listing databases",
        })?;
        let (_engine, mut conn) = self.create_connection(None)?;
        let dataset = conn.query(sql, &[])?;
        Ok(first_column_text(&dataset))
    }

    pub fn get_tables(&self, database: &str) -> Result<Vec<String>> {
        let sql = D::KIND.list_tables_sql().ok_or(Error::Unsupported {
            dialect: D::KIND,
            operation: "Listing tables",
        })?;
        let (_engine, mut conn) = self.create_connection(Some(database))?;
        let dataset = conn.query(sql, &[])?;
        Ok(first_column_text(&dataset))
    }

    /// Reads a whole table. Returns `Ok(None)` when it does not exist.
    pub fn load_table(
        &self,
        database: &str,
        table: &str,
        options: &ReadOptions,
    ) -> Result<Option<Dataset>> {
        let (_engine, mut conn) = self.create_connection(Some(database))?;
        read_table::<D>(&mut *conn, database, table, options)
    }

    /// Reads several tables over one connection, in the order given.
    pub fn load_tables<S: AsRef<str>>(
        &self,
        database: &str,
        tables: &[S],
        options: &ReadOptions,
    ) -> Result<Vec<Option<Dataset>>> {
        let (_engine, mut conn) = self.create_connection(Some(database))?;
        tables
            .iter()
            .map(|table| read_table::<D>(&mut *conn, database, table.as_ref(), options))
            .collect()
    }

    /// Writes `dataset` to `table`, creating it from the inferred (or
    /// supplied) schema as `options.if_exists` dictates. Returns the number
    /// of rows written.
    pub fn save_table(
        &self,
        dataset: &Dataset,
        database: &str,
        table: &str,
        options: &SaveOptions,
    ) -> Result<u64> {
        if dataset.column_count() == 0 && !options.index {
            return Err(Error::NoColumns(table.to_string()));
        }
        let source: Cow<'_, Dataset> = if options.index {
            Cow::Owned(dataset.with_index_column(&options.index_label)?)
        } else {
            Cow::Borrowed(dataset)
        };
        let inferred = schema::infer_schema_with(&source, &options.inference);
        let mut prepared = source.into_owned();
        schema::normalize_dataset(&mut prepared, &inferred);
        let table_schema = merge_schema(inferred.schema, options.schema.as_ref());

        let (_engine, mut conn) = self.create_connection(Some(database))?;
        let exists = conn.has_table(table)?;
        match (exists, options.if_exists) {
            (true, IfExists::Fail) => return Err(Error::TableExists(table.to_string())),
            (true, IfExists::Append) => {
                debug!("Appending to existing table '{table}' in '{database}'");
            }
            (true, IfExists::Replace) => {
                info!("Replacing table '{table}' in '{database}'");
                conn.execute(&D::KIND.drop_table_sql(table), &[])?;
                conn.execute(&table_schema.create_table_sql(D::KIND, table), &[])?;
            }
            (false, _) => {
                conn.execute(&table_schema.create_table_sql(D::KIND, table), &[])?;
            }
        }
        let written = conn.insert_rows(table, &prepared, &table_schema, options.chunk_size)?;
        info!(
            "Saved {written} row(s) to '{table}' in '{database}' ({} column(s))",
            table_schema.len()
        );
        Ok(written)
    }

    pub fn query(&self, sql: &str, database: Option<&str>, options: &ReadOptions) -> Result<Dataset> {
        let (_engine, mut conn) = self.create_connection(database)?;
        let mut dataset = conn.query(sql, &options.params)?;
        apply_parse_dates(&mut dataset, &options.parse_dates);
        Ok(dataset)
    }

    /// Runs a statement that returns no rows, binding `params` positionally.
    pub fn execute(
        &self,
        sql: &str,
        database: Option<&str>,
        params: &[Value],
    ) -> Result<ExecutionSummary> {
        let (_engine, mut conn) = self.create_connection(database)?;
        let summary = conn.execute(sql, params)?;
        debug!("Statement affected {} row(s)", summary.rows_affected);
        Ok(summary)
    }

    /// `SELECT COUNT(*)` for a table, or `None` when the table is missing.
    pub fn get_count(&self, database: &str, table: &str) -> Result<Option<u64>> {
        let (_engine, mut conn) = self.create_connection(Some(database))?;
        if !conn.has_table(table)? {
            info!("Table '{table}' does not exist in '{database}'");
            return Ok(None);
        }
        let dataset = conn.query(&D::KIND.count_sql(table), &[])?;
        let count = dataset
            .columns()
            .first()
            .and_then(|column| column.values().first())
            .and_then(count_value)
            .ok_or_else(|| {
                DriverError::new(format!("COUNT(*) on '{table}' returned no numeric value"))
            })?;
        Ok(Some(count))
    }

    /// Runs a stored procedure call on a raw connection and commits it.
    /// `params` are bound positionally.
    pub fn call_procedure(
        &self,
        sql: &str,
        database: Option<&str>,
        params: &[Value],
        return_dataset: bool,
    ) -> Result<ProcedureResult> {
        let (_engine, mut raw) = self.create_raw_connection(database)?;
        let cursor = raw.call(sql, params)?;
        raw.commit()?;
        if let Err(err) = raw.close() {
            warn!("Failed to close database connection: {err}");
        }
        if !return_dataset {
            return Ok(ProcedureResult::RowsAffected(cursor.rows_affected));
        }
        match cursor.columns {
            Some(columns) => Ok(ProcedureResult::Rows(Dataset::from_rows(columns, cursor.rows)?)),
            None => Ok(ProcedureResult::NoResultSet),
        }
    }

    /// Disposes every cached engine. Also runs on drop.
    pub fn close(&self) {
        self.engines.dispose_all();
    }
}

impl<D: Dialect> Drop for Database<D> {
    fn drop(&mut self) {
        self.engines.dispose_all();
    }
}

impl<D: Dialect> fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &D::KIND)
            .field("host", &self.config.host)
            .field("port", &self.port())
            .field("username", &self.config.username)
            .field("engines", &self.engines)
            .finish()
    }
}

fn read_table<D: Dialect>(
    conn: &mut dyn Connection,
    database: &str,
    table: &str,
    options: &ReadOptions,
) -> Result<Option<Dataset>> {
    if !conn.has_table(table)? {
        info!("Table '{table}' does not exist in '{database}'");
        return Ok(None);
    }
    let mut dataset = conn.query(&select_sql(D::KIND, table, options.columns.as_deref()), &[])?;
    apply_parse_dates(&mut dataset, &options.parse_dates);
    debug!(
        "Loaded {} row(s) from '{table}' in '{database}'",
        dataset.row_count()
    );
    Ok(Some(dataset))
}

pub(crate) fn select_sql(dialect: DialectKind, table: &str, columns: Option<&[String]>) -> String {
    let projection = match columns {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|name| dialect.quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "*".to_string(),
    };
    format!(
        "SELECT {projection} FROM {};",
        dialect.quote_identifier(table)
    )
}

/// Parses the named columns into timestamps. A column with any value that
/// does not parse is left untouched.
fn apply_parse_dates(dataset: &mut Dataset, columns: &[String]) {
    if columns.is_empty() {
        return;
    }
    for column in dataset.columns_mut() {
        if !columns.iter().any(|name| name == column.name()) {
            continue;
        }
        let texts: Vec<String> = column
            .values()
            .iter()
            .filter(|value| !matches!(value, Value::Null | Value::DateTime(_)))
            .map(Value::as_display)
            .collect();
        match data::parse_datetime_column(&texts) {
            Some(parsed) => {
                let mut parsed = parsed.into_iter();
                for value in column.values_mut().iter_mut() {
                    if !matches!(value, Value::Null | Value::DateTime(_)) {
                        if let Some(timestamp) = parsed.next() {
                            *value = Value::DateTime(timestamp);
                        }
                    }
                }
            }
            None => warn!(
                "Column '{}' contains values that are not dates; left unparsed",
                column.name()
            ),
        }
    }
}

/// Supplied column types win; the rest come from inference.
fn merge_schema(inferred: TableSchema, supplied: Option<&TableSchema>) -> TableSchema {
    let Some(supplied) = supplied else {
        return inferred;
    };
    let columns = inferred
        .columns
        .into_iter()
        .map(|column| match supplied.get(&column.name) {
            Some(sql_type) => ColumnSchema {
                name: column.name,
                sql_type,
            },
            None => column,
        })
        .collect();
    TableSchema { columns }
}

fn first_column_text(dataset: &Dataset) -> Vec<String> {
    dataset
        .columns()
        .first()
        .map(|column| {
            column
                .values()
                .iter()
                .filter(|value| !value.is_null())
                .map(Value::as_display)
                .collect()
        })
        .unwrap_or_default()
}

fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(n) => u64::try_from(*n).ok(),
        Value::Float(f) if f.is_finite() && *f >= 0.0 => Some(*f as u64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
