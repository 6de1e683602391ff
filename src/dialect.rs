//! Per-dialect connection URLs, catalog queries and identifier quoting.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Characters that must be escaped inside the userinfo part of a URL.
const USERINFO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[value(name = "mysql")]
    MySql,
    #[value(name = "postgresql", alias = "postgres")]
    PostgreSql,
    #[value(name = "mssql")]
    MsSql,
}

impl DialectKind {
    pub fn name(self) -> &'static str {
        match self {
            DialectKind::MySql => "MySQL",
            DialectKind::PostgreSql => "PostgreSQL",
            DialectKind::MsSql => "MS SQL Server",
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            DialectKind::MySql => "mysql",
            DialectKind::PostgreSql => "postgresql",
            DialectKind::MsSql => "mssql",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            DialectKind::MySql => 3306,
            DialectKind::PostgreSql => 5432,
            DialectKind::MsSql => 1433,
        }
    }

    fn query_suffix(self) -> &'static str {
        match self {
            DialectKind::MySql => "?charset=utf8mb4",
            DialectKind::PostgreSql => "",
            DialectKind::MsSql => "?charset=utf8",
        }
    }

    /// `{scheme}://{user}:{pass}@{host}:{port}/{database}` plus the
    /// dialect's charset parameter. Credentials are percent-encoded.
    pub fn engine_url(
        self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        database: &str,
    ) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}{}",
            self.scheme(),
            utf8_percent_encode(username, USERINFO),
            utf8_percent_encode(password, USERINFO),
            host,
            port,
            database,
            self.query_suffix()
        )
    }

    pub fn list_databases_sql(self) -> Option<&'static str> {
        match self {
            DialectKind::MySql => Some("SHOW DATABASES;"),
            DialectKind::MsSql => Some("SELECT name FROM master.sys.databases;"),
            DialectKind::PostgreSql => None,
        }
    }

    pub fn list_tables_sql(self) -> Option<&'static str> {
        match self {
            DialectKind::MySql => Some("SHOW TABLES;"),
            DialectKind::MsSql => Some("SELECT TABLE_NAME FROM information_schema.tables;"),
            DialectKind::PostgreSql => None,
        }
    }

    pub fn quote_identifier(self, identifier: &str) -> String {
        match self {
            DialectKind::MySql => format!("`{}`", identifier.replace('`', "``")),
            DialectKind::PostgreSql => format!("\"{}\"", identifier.replace('"', "\"\"")),
            DialectKind::MsSql => format!("[{}]", identifier.replace(']', "]]")),
        }
    }

    pub fn count_sql(self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {};", self.quote_identifier(table))
    }

    pub fn drop_table_sql(self, table: &str) -> String {
        format!("DROP TABLE {};", self.quote_identifier(table))
    }

    pub(crate) fn datetime_type(self) -> &'static str {
        match self {
            DialectKind::PostgreSql => "TIMESTAMP",
            _ => "DATETIME",
        }
    }

    pub(crate) fn unbounded_text_type(self) -> &'static str {
        match self {
            DialectKind::MsSql => "VARCHAR(MAX)",
            _ => "TEXT",
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DialectKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DialectKind::MySql),
            "postgresql" | "postgres" | "pgsql" => Ok(DialectKind::PostgreSql),
            "mssql" | "sqlserver" => Ok(DialectKind::MsSql),
            other => Err(format!("Unknown dialect '{other}'")),
        }
    }
}

/// Compile-time dialect selection for [`crate::db::Database`].
pub trait Dialect: Send + Sync + 'static {
    const KIND: DialectKind;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgreSql;

#[derive(Debug, Clone, Copy, Default)]
pub struct MsSql;

impl Dialect for MySql {
    const KIND: DialectKind = DialectKind::MySql;
}

impl Dialect for PostgreSql {
    const KIND: DialectKind = DialectKind::PostgreSql;
}

impl Dialect for MsSql {
    const KIND: DialectKind = DialectKind::MsSql;
}
