//! [`Driver`] implementation over `sqlx` pools for MySQL and PostgreSQL.
//!
//! The crate API is blocking, so every engine shares a current-thread tokio
//! runtime and drives each statement with `block_on`. Pools are created
//! lazily; the first real connection attempt happens in
//! [`Engine::connect`], which is where the retry loop observes failures.

use std::{str::FromStr, sync::Arc};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use log::debug;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use sqlx::{
    Column as _, Either, Executor, Row, Transaction, TypeInfo, ValueRef,
    mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlQueryResult, MySqlRow},
    pool::PoolConnection,
    postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgQueryResult, PgRow, Postgres},
};
use tokio::runtime::{Builder, Runtime};

use crate::{
    data::Value,
    dataset::Dataset,
    dialect::DialectKind,
    driver::{
        Close, Connection, CursorResult, Driver, DriverError, Engine, ExecutionSummary,
        RawConnection,
    },
    schema::{SqlColumnType, TableSchema},
};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CHUNK_ROWS: usize = 1000;
/// Bind-parameter ceiling shared by the MySQL and PostgreSQL protocols.
const MAX_BIND_PARAMS: usize = 65_535;

fn driver_error(err: sqlx::Error) -> DriverError {
    DriverError::new(err.to_string())
}

pub struct SqlxDriver {
    runtime: Arc<Runtime>,
    max_connections: u32,
}

impl SqlxDriver {
    pub fn new() -> Result<Self, DriverError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| DriverError::with_source("Starting tokio runtime", err))?;
        Ok(Self {
            runtime: Arc::new(runtime),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        })
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }
}

impl Driver for SqlxDriver {
    fn create_engine(&self, url: &str) -> Result<Arc<dyn Engine>, DriverError> {
        let _entered = self.runtime.enter();
        let scheme = url.split_once("://").map(|(scheme, _)| scheme).unwrap_or("");
        let pool = match scheme {
            "mysql" => {
                let options = MySqlConnectOptions::from_str(url).map_err(driver_error)?;
                SqlxPool::MySql(
                    MySqlPoolOptions::new()
                        .max_connections(self.max_connections)
                        .connect_lazy_with(options),
                )
            }
            "postgresql" | "postgres" => {
                let options = PgConnectOptions::from_str(url).map_err(driver_error)?;
                SqlxPool::Postgres(
                    PgPoolOptions::new()
                        .max_connections(self.max_connections)
                        .connect_lazy_with(options),
                )
            }
            other => {
                return Err(DriverError::new(format!(
                    "No sqlx backend for scheme '{other}'"
                )));
            }
        };
        debug!("Created lazy {scheme} pool");
        Ok(Arc::new(SqlxEngine {
            runtime: self.runtime.clone(),
            pool,
        }))
    }
}

enum SqlxPool {
    MySql(MySqlPool),
    Postgres(PgPool),
}

struct SqlxEngine {
    runtime: Arc<Runtime>,
    pool: SqlxPool,
}

impl Engine for SqlxEngine {
    fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        let conn = match &self.pool {
            SqlxPool::MySql(pool) => {
                Pooled::MySql(self.runtime.block_on(pool.acquire()).map_err(driver_error)?)
            }
            SqlxPool::Postgres(pool) => {
                Pooled::Postgres(self.runtime.block_on(pool.acquire()).map_err(driver_error)?)
            }
        };
        Ok(Box::new(SqlxConnection {
            runtime: self.runtime.clone(),
            conn: Some(conn),
        }))
    }

    fn raw_connect(&self) -> Result<Box<dyn RawConnection>, DriverError> {
        let tx = match &self.pool {
            SqlxPool::MySql(pool) => {
                PendingTx::MySql(self.runtime.block_on(pool.begin()).map_err(driver_error)?)
            }
            SqlxPool::Postgres(pool) => {
                PendingTx::Postgres(self.runtime.block_on(pool.begin()).map_err(driver_error)?)
            }
        };
        Ok(Box::new(SqlxRawConnection {
            runtime: self.runtime.clone(),
            tx: Some(tx),
        }))
    }

    fn dispose(&self) -> Result<(), DriverError> {
        match &self.pool {
            SqlxPool::MySql(pool) => self.runtime.block_on(pool.close()),
            SqlxPool::Postgres(pool) => self.runtime.block_on(pool.close()),
        }
        Ok(())
    }
}

enum Pooled {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
}

struct SqlxConnection {
    runtime: Arc<Runtime>,
    conn: Option<Pooled>,
}

impl SqlxConnection {
    fn pooled(&mut self) -> Result<&mut Pooled, DriverError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DriverError::new("Connection already closed"))
    }
}

impl Close for SqlxConnection {
    fn close(mut self: Box<Self>) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(Pooled::MySql(conn)) => self.runtime.block_on(conn.close()).map_err(driver_error),
            Some(Pooled::Postgres(conn)) => {
                self.runtime.block_on(conn.close()).map_err(driver_error)
            }
            None => Ok(()),
        }
    }
}

impl Drop for SqlxConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _entered = self.runtime.enter();
            drop(conn);
        }
    }
}

impl Connection for SqlxConnection {
    fn has_table(&mut self, table: &str) -> Result<bool, DriverError> {
        let runtime = self.runtime.clone();
        match self.pooled()? {
            Pooled::MySql(conn) => runtime.block_on(mysql::has_table(conn, table)),
            Pooled::Postgres(conn) => runtime.block_on(postgres::has_table(conn, table)),
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Dataset, DriverError> {
        let runtime = self.runtime.clone();
        match self.pooled()? {
            Pooled::MySql(conn) => runtime.block_on(mysql::query(conn, sql, params)),
            Pooled::Postgres(conn) => runtime.block_on(postgres::query(conn, sql, params)),
        }
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecutionSummary, DriverError> {
        let runtime = self.runtime.clone();
        match self.pooled()? {
            Pooled::MySql(conn) => runtime.block_on(mysql::execute(conn, sql, params)),
            Pooled::Postgres(conn) => runtime.block_on(postgres::execute(conn, sql, params)),
        }
    }

    fn insert_rows(
        &mut self,
        table: &str,
        dataset: &Dataset,
        schema: &TableSchema,
        chunk_size: Option<usize>,
    ) -> Result<u64, DriverError> {
        let runtime = self.runtime.clone();
        match self.pooled()? {
            Pooled::MySql(conn) => {
                runtime.block_on(mysql::insert_rows(conn, table, dataset, schema, chunk_size))
            }
            Pooled::Postgres(conn) => {
                runtime.block_on(postgres::insert_rows(conn, table, dataset, schema, chunk_size))
            }
        }
    }
}

enum PendingTx {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
}

/// Connection inside an open transaction; [`RawConnection::commit`] ends it
/// and closing without a commit rolls it back.
struct SqlxRawConnection {
    runtime: Arc<Runtime>,
    tx: Option<PendingTx>,
}

impl RawConnection for SqlxRawConnection {
    fn call(&mut self, sql: &str, params: &[Value]) -> Result<CursorResult, DriverError> {
        match self.tx.as_mut() {
            Some(PendingTx::MySql(tx)) => self.runtime.block_on(mysql::call(tx, sql, params)),
            Some(PendingTx::Postgres(tx)) => {
                self.runtime.block_on(postgres::call(tx, sql, params))
            }
            None => Err(DriverError::new("Transaction already committed")),
        }
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        match self.tx.take() {
            Some(PendingTx::MySql(tx)) => self.runtime.block_on(tx.commit()).map_err(driver_error),
            Some(PendingTx::Postgres(tx)) => {
                self.runtime.block_on(tx.commit()).map_err(driver_error)
            }
            None => Ok(()),
        }
    }
}

impl Close for SqlxRawConnection {
    fn close(mut self: Box<Self>) -> Result<(), DriverError> {
        match self.tx.take() {
            Some(PendingTx::MySql(tx)) => {
                self.runtime.block_on(tx.rollback()).map_err(driver_error)
            }
            Some(PendingTx::Postgres(tx)) => {
                self.runtime.block_on(tx.rollback()).map_err(driver_error)
            }
            None => Ok(()),
        }
    }
}

impl Drop for SqlxRawConnection {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _entered = self.runtime.enter();
            drop(tx);
        }
    }
}

/// Binds one cell, typing nulls and booleans after the target column so
/// PostgreSQL accepts them without casts.
macro_rules! bind_value {
    ($query:ident, $value:expr, $hint:expr) => {
        match ($value, $hint) {
            (Value::Null, Some(SqlColumnType::Integer)) => $query.bind(None::<i64>),
            (Value::Null, Some(SqlColumnType::Decimal { .. })) => $query.bind(None::<f64>),
            (Value::Null, Some(SqlColumnType::DateTime)) => $query.bind(None::<NaiveDateTime>),
            (Value::Null, _) => $query.bind(None::<String>),
            (Value::String(text), _) => $query.bind(text.clone()),
            (Value::Integer(n), _) => $query.bind(*n),
            (Value::Float(f), _) => $query.bind(*f),
            (Value::Boolean(b), Some(SqlColumnType::Integer)) => $query.bind(i64::from(*b)),
            (Value::Boolean(b), _) => $query.bind(*b),
            (Value::DateTime(dt), _) => $query.bind(*dt),
        }
    };
}

/// Statement helpers for one sqlx backend. Both backends share the logic and
/// differ only in row decoding, placeholders and catalog SQL.
macro_rules! backend {
    (
        $module:ident,
        db: $db:ty,
        row: $row:ty,
        dialect: $dialect:expr,
        has_table_sql: $has_table_sql:expr,
        placeholder: $placeholder:expr,
        decode: $decode:path,
        last_insert_id: $last_insert_id:expr $(,)?
    ) => {
        mod $module {
            use super::*;
            use sqlx::Column as _;

            fn headers(row: &$row) -> Vec<String> {
                row.columns().iter().map(|c| c.name().to_string()).collect()
            }

            fn decode_row(row: &$row) -> Result<Vec<Value>, DriverError> {
                (0..row.len())
                    .map(|index| $decode(row, index).map_err(driver_error))
                    .collect()
            }

            pub(super) async fn has_table(
                conn: &mut PoolConnection<$db>,
                table: &str,
            ) -> Result<bool, DriverError> {
                let count: i64 = sqlx::query_scalar::<$db, i64>($has_table_sql)
                    .bind(table)
                    .fetch_one(&mut **conn)
                    .await
                    .map_err(driver_error)?;
                Ok(count > 0)
            }

            pub(super) async fn query(
                conn: &mut PoolConnection<$db>,
                sql: &str,
                params: &[Value],
            ) -> Result<Dataset, DriverError> {
                let mut query = sqlx::query::<$db>(sql);
                for value in params {
                    query = bind_value!(query, value, None::<SqlColumnType>);
                }
                let rows = query.fetch_all(&mut **conn).await.map_err(driver_error)?;
                let names = match rows.first() {
                    Some(row) => headers(row),
                    None => (&mut **conn)
                        .describe(sql)
                        .await
                        .map_err(driver_error)?
                        .columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect(),
                };
                let values = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
                Dataset::from_rows(names, values)
                    .map_err(|err| DriverError::with_source("Building result set", err))
            }

            pub(super) async fn execute(
                conn: &mut PoolConnection<$db>,
                sql: &str,
                params: &[Value],
            ) -> Result<ExecutionSummary, DriverError> {
                let mut query = sqlx::query::<$db>(sql);
                for value in params {
                    query = bind_value!(query, value, None::<SqlColumnType>);
                }
                let done = query.execute(&mut **conn).await.map_err(driver_error)?;
                Ok(ExecutionSummary {
                    rows_affected: done.rows_affected(),
                    last_insert_id: $last_insert_id(&done),
                })
            }

            pub(super) async fn insert_rows(
                conn: &mut PoolConnection<$db>,
                table: &str,
                dataset: &Dataset,
                schema: &TableSchema,
                chunk_size: Option<usize>,
            ) -> Result<u64, DriverError> {
                let columns = dataset.columns();
                let row_count = dataset.row_count();
                if columns.is_empty() || row_count == 0 {
                    return Ok(0);
                }
                let width = columns.len();
                let hints: Vec<Option<SqlColumnType>> =
                    columns.iter().map(|c| schema.get(c.name())).collect();
                let column_list = columns
                    .iter()
                    .map(|c| $dialect.quote_identifier(c.name()))
                    .collect::<Vec<_>>()
                    .join(", ");
                let chunk = chunk_size
                    .unwrap_or(DEFAULT_CHUNK_ROWS)
                    .min(MAX_BIND_PARAMS / width)
                    .max(1);

                let mut written = 0;
                for start in (0..row_count).step_by(chunk) {
                    let end = (start + chunk).min(row_count);
                    let mut sql = format!(
                        "INSERT INTO {} ({}) VALUES ",
                        $dialect.quote_identifier(table),
                        column_list
                    );
                    let mut param = 0;
                    for row in start..end {
                        if row > start {
                            sql.push_str(", ");
                        }
                        sql.push('(');
                        for col in 0..width {
                            if col > 0 {
                                sql.push_str(", ");
                            }
                            param += 1;
                            sql.push_str(&$placeholder(param));
                        }
                        sql.push(')');
                    }
                    let mut query = sqlx::query::<$db>(&sql);
                    for row in start..end {
                        for (column, hint) in columns.iter().zip(&hints) {
                            query = bind_value!(query, &column.values()[row], *hint);
                        }
                    }
                    written += query
                        .execute(&mut **conn)
                        .await
                        .map_err(driver_error)?
                        .rows_affected();
                    debug!("Inserted rows {start}..{end} into '{table}'");
                }
                Ok(written)
            }

            pub(super) async fn call(
                tx: &mut Transaction<'static, $db>,
                sql: &str,
                params: &[Value],
            ) -> Result<CursorResult, DriverError> {
                let mut query = sqlx::query::<$db>(sql);
                for value in params {
                    query = bind_value!(query, value, None::<SqlColumnType>);
                }
                let mut result = CursorResult::default();
                let mut stream = (&mut **tx).fetch_many(query);
                while let Some(item) = stream.try_next().await.map_err(driver_error)? {
                    match item {
                        Either::Left(done) => result.rows_affected += done.rows_affected(),
                        Either::Right(row) => {
                            if result.columns.is_none() {
                                result.columns = Some(headers(&row));
                            }
                            result.rows.push(decode_row(&row)?);
                        }
                    }
                }
                Ok(result)
            }
        }
    };
}

backend!(
    mysql,
    db: MySql,
    row: MySqlRow,
    dialect: DialectKind::MySql,
    has_table_sql: "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?",
    placeholder: |_: usize| "?".to_string(),
    decode: mysql_cell,
    last_insert_id: |done: &MySqlQueryResult| Some(done.last_insert_id()),
);

backend!(
    postgres,
    db: Postgres,
    row: PgRow,
    dialect: DialectKind::PostgreSql,
    has_table_sql: "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1",
    placeholder: |n: usize| format!("${n}"),
    decode: pg_cell,
    last_insert_id: |_: &PgQueryResult| None,
);

fn decimal_value(decimal: Decimal) -> Value {
    decimal
        .to_f64()
        .map(Value::Float)
        .unwrap_or_else(|| Value::String(decimal.to_string()))
}

fn midnight(date: NaiveDate) -> Value {
    Value::DateTime(date.and_time(NaiveTime::MIN))
}

fn mysql_cell(row: &MySqlRow, index: usize) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    let type_name = row.column(index).type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOLEAN" => Value::Boolean(row.try_get_unchecked::<bool, _>(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            Value::Integer(row.try_get_unchecked::<i64, _>(index)?)
        }
        name if name.ends_with("UNSIGNED") => {
            let n = row.try_get_unchecked::<u64, _>(index)?;
            i64::try_from(n)
                .map(Value::Integer)
                .unwrap_or(Value::Float(n as f64))
        }
        "FLOAT" => Value::Float(f64::from(row.try_get_unchecked::<f32, _>(index)?)),
        "DOUBLE" => Value::Float(row.try_get_unchecked::<f64, _>(index)?),
        "DECIMAL" => decimal_value(row.try_get_unchecked::<Decimal, _>(index)?),
        "DATETIME" | "TIMESTAMP" => Value::DateTime(row.try_get_unchecked::<NaiveDateTime, _>(index)?),
        "DATE" => midnight(row.try_get_unchecked::<NaiveDate, _>(index)?),
        "TIME" => Value::String(row.try_get_unchecked::<NaiveTime, _>(index)?.to_string()),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

fn pg_cell(row: &PgRow, index: usize) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    let type_name = row.column(index).type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => Value::Boolean(row.try_get::<bool, _>(index)?),
        "INT2" => Value::Integer(i64::from(row.try_get::<i16, _>(index)?)),
        "INT4" => Value::Integer(i64::from(row.try_get::<i32, _>(index)?)),
        "INT8" => Value::Integer(row.try_get::<i64, _>(index)?),
        "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => Value::Float(row.try_get::<f64, _>(index)?),
        "NUMERIC" => decimal_value(row.try_get::<Decimal, _>(index)?),
        "TIMESTAMP" => Value::DateTime(row.try_get::<NaiveDateTime, _>(index)?),
        "TIMESTAMPTZ" => Value::DateTime(row.try_get::<DateTime<Utc>, _>(index)?.naive_utc()),
        "DATE" => midnight(row.try_get::<NaiveDate, _>(index)?),
        "TIME" => Value::String(row.try_get::<NaiveTime, _>(index)?.to_string()),
        _ => Value::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}
