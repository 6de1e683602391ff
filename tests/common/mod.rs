#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use coralinedb::dataset::Dataset;
use coralinedb::dialect::DialectKind;
use coralinedb::driver::{
    Close, Connection, CursorResult, Driver, DriverError, Engine, ExecutionSummary, RawConnection,
};
use coralinedb::retry::Sleeper;
use coralinedb::schema::TableSchema;
use coralinedb::{ConnectionConfig, Value};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Everything the fake driver observed, plus knobs for injecting failures.
#[derive(Default)]
pub struct FakeState {
    pub engine_urls: Vec<String>,
    pub disposed: usize,
    pub opened: usize,
    pub closed: usize,
    pub commits: usize,
    /// Number of upcoming connection attempts that fail.
    pub connect_failures: usize,
    pub fail_dispose: bool,
    pub statements: Vec<String>,
    /// Bind parameters passed to `execute` and `call`, in call order.
    pub bound_params: Vec<Vec<Value>>,
    pub databases: BTreeMap<String, BTreeMap<String, Dataset>>,
    pub procedure_result: CursorResult,
}

impl FakeState {
    pub fn table(&self, database: &str, table: &str) -> Option<&Dataset> {
        self.databases.get(database).and_then(|tables| tables.get(table))
    }
}

pub struct FakeDriver {
    dialect: DialectKind,
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub fn new(dialect: DialectKind) -> Arc<Self> {
        Arc::new(Self {
            dialect,
            state: Arc::new(Mutex::new(FakeState::default())),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state lock")
    }

    pub fn add_table(&self, database: &str, table: &str, dataset: Dataset) {
        self.state()
            .databases
            .entry(database.to_string())
            .or_default()
            .insert(table.to_string(), dataset);
    }

    pub fn add_database(&self, database: &str) {
        self.state().databases.entry(database.to_string()).or_default();
    }
}

impl Driver for FakeDriver {
    fn create_engine(&self, url: &str) -> Result<Arc<dyn Engine>, DriverError> {
        self.state().engine_urls.push(url.to_string());
        let database = url
            .rsplit_once('/')
            .map(|(_, rest)| rest.split('?').next().unwrap_or_default().to_string())
            .unwrap_or_default();
        Ok(Arc::new(FakeEngine {
            dialect: self.dialect,
            database,
            state: self.state.clone(),
        }))
    }
}

struct FakeEngine {
    dialect: DialectKind,
    database: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    fn try_open(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().expect("fake state lock");
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(DriverError::new("[Errno 101] Network is unreachable"));
        }
        state.opened += 1;
        Ok(())
    }
}

impl Engine for FakeEngine {
    fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        self.try_open()?;
        Ok(Box::new(FakeConnection {
            dialect: self.dialect,
            database: self.database.clone(),
            state: self.state.clone(),
        }))
    }

    fn raw_connect(&self) -> Result<Box<dyn RawConnection>, DriverError> {
        self.try_open()?;
        Ok(Box::new(FakeRawConnection {
            state: self.state.clone(),
        }))
    }

    fn dispose(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().expect("fake state lock");
        state.disposed += 1;
        if state.fail_dispose {
            Err(DriverError::new("engine already disposed"))
        } else {
            Ok(())
        }
    }
}

struct FakeConnection {
    dialect: DialectKind,
    database: String,
    state: Arc<Mutex<FakeState>>,
}

/// Strips one layer of dialect quoting from an identifier.
fn unquote(quoted: &str) -> String {
    let trimmed = quoted.trim();
    let mut chars = trimmed.chars();
    chars.next();
    chars.next_back();
    chars.as_str().to_string()
}

fn between<'a>(sql: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let rest = &sql[sql.find(start)? + start.len()..];
    Some(&rest[..rest.find(end)?])
}

fn single_column(name: &str, values: Vec<String>) -> Dataset {
    Dataset::from_rows(
        vec![name.to_string()],
        values.into_iter().map(|v| vec![Value::String(v)]).collect(),
    )
    .expect("single column dataset")
}

fn cloned_rows(dataset: &Dataset) -> Vec<Vec<Value>> {
    dataset
        .rows()
        .map(|row| row.into_iter().cloned().collect())
        .collect()
}

impl Close for FakeConnection {
    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.state.lock().expect("fake state lock").closed += 1;
        Ok(())
    }
}

impl Connection for FakeConnection {
    fn has_table(&mut self, table: &str) -> Result<bool, DriverError> {
        let state = self.state.lock().expect("fake state lock");
        Ok(state.table(&self.database, table).is_some())
    }

    fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Dataset, DriverError> {
        let mut state = self.state.lock().expect("fake state lock");
        state.statements.push(sql.to_string());
        if Some(sql) == self.dialect.list_databases_sql() {
            let names = state.databases.keys().cloned().collect();
            return Ok(single_column("Database", names));
        }
        if Some(sql) == self.dialect.list_tables_sql() {
            let names = state
                .databases
                .get(&self.database)
                .map(|tables| tables.keys().cloned().collect())
                .unwrap_or_default();
            return Ok(single_column("Tables", names));
        }
        if let Some(quoted) = between(sql, "SELECT COUNT(*) FROM ", ";") {
            let table = state
                .table(&self.database, &unquote(quoted))
                .ok_or_else(|| DriverError::new("Table doesn't exist"))?;
            return Dataset::from_rows(
                vec!["COUNT(*)".to_string()],
                vec![vec![Value::Integer(table.row_count() as i64)]],
            )
            .map_err(|err| DriverError::new(err.to_string()));
        }
        if let (Some(projection), Some(quoted)) =
            (between(sql, "SELECT ", " FROM "), between(sql, " FROM ", ";"))
        {
            let table = state
                .table(&self.database, &unquote(quoted))
                .ok_or_else(|| DriverError::new("Table doesn't exist"))?;
            if projection == "*" {
                return Ok(table.clone());
            }
            let columns = projection
                .split(", ")
                .map(|quoted| {
                    table
                        .column(&unquote(quoted))
                        .cloned()
                        .ok_or_else(|| DriverError::new(format!("Unknown column {quoted}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Dataset::new(columns).map_err(|err| DriverError::new(err.to_string()));
        }
        Err(DriverError::new(format!(
            "You have an error in your SQL syntax near '{sql}'"
        )))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecutionSummary, DriverError> {
        let mut state = self.state.lock().expect("fake state lock");
        state.statements.push(sql.to_string());
        state.bound_params.push(params.to_vec());
        let tables = state.databases.entry(self.database.clone()).or_default();
        if let Some(quoted) = between(sql, "DROP TABLE ", ";") {
            tables
                .remove(&unquote(quoted))
                .ok_or_else(|| DriverError::new("Unknown table"))?;
            return Ok(ExecutionSummary::default());
        }
        if let Some(quoted) = between(sql, "CREATE TABLE ", " (") {
            let name = unquote(quoted);
            if tables.contains_key(&name) {
                return Err(DriverError::new(format!("Table '{name}' already exists")));
            }
            let columns = sql
                .lines()
                .skip(1)
                .filter_map(|line| line.trim().split_once(' '))
                .map(|(quoted, _)| coralinedb::Column::new(unquote(quoted), Vec::new()))
                .collect();
            let empty = Dataset::new(columns).map_err(|err| DriverError::new(err.to_string()))?;
            tables.insert(name, empty);
            return Ok(ExecutionSummary::default());
        }
        if sql.starts_with("UPDATE") || sql.starts_with("DELETE") {
            return Ok(ExecutionSummary {
                rows_affected: 1,
                last_insert_id: None,
            });
        }
        Err(DriverError::new(format!(
            "You have an error in your SQL syntax near '{sql}'"
        )))
    }

    fn insert_rows(
        &mut self,
        table: &str,
        dataset: &Dataset,
        _schema: &TableSchema,
        _chunk_size: Option<usize>,
    ) -> Result<u64, DriverError> {
        let mut state = self.state.lock().expect("fake state lock");
        let tables = state.databases.entry(self.database.clone()).or_default();
        let existing = tables
            .get(table)
            .ok_or_else(|| DriverError::new(format!("Table '{table}' doesn't exist")))?;
        let mut rows = cloned_rows(existing);
        rows.extend(cloned_rows(dataset));
        let merged = Dataset::from_rows(dataset.column_names(), rows)
            .map_err(|err| DriverError::new(err.to_string()))?;
        tables.insert(table.to_string(), merged);
        Ok(dataset.row_count() as u64)
    }
}

struct FakeRawConnection {
    state: Arc<Mutex<FakeState>>,
}

impl Close for FakeRawConnection {
    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.state.lock().expect("fake state lock").closed += 1;
        Ok(())
    }
}

impl RawConnection for FakeRawConnection {
    fn call(&mut self, sql: &str, params: &[Value]) -> Result<CursorResult, DriverError> {
        let mut state = self.state.lock().expect("fake state lock");
        state.statements.push(sql.to_string());
        state.bound_params.push(params.to_vec());
        Ok(state.procedure_result.clone())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.state.lock().expect("fake state lock").commits += 1;
        Ok(())
    }
}

/// Records requested waits instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().expect("sleeper lock").clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.lock().expect("sleeper lock").push(duration);
    }
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("db.local", "etl", "secret")
}
