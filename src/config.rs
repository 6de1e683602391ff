use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dialect::DialectKind;
use crate::retry::RetryPolicy;

/// Server address, credentials and retry policy shared by every database
/// reached through one [`crate::db::Database`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Falls back to the dialect's default port when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            port: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn effective_port(&self, dialect: DialectKind) -> u16 {
        self.port.unwrap_or_else(|| dialect.default_port())
    }

    pub fn engine_url(&self, dialect: DialectKind, database: &str) -> String {
        dialect.engine_url(
            &self.host,
            self.effective_port(dialect),
            &self.username,
            &self.password,
            database,
        )
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Opening connection config {path:?}"))?;
        let config: ConnectionConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Parsing connection config {path:?}"))?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Parsing connection config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    #[test]
    fn yaml_config_applies_defaults() {
        let config =
            ConnectionConfig::from_yaml_str("host: db.local\nusername: etl\npassword: pw\n")
                .unwrap();
        assert_eq!(config.port, None);
        assert_eq!(config.effective_port(DialectKind::MySql), 3306);
        assert_eq!(config.effective_port(DialectKind::MsSql), 1433);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn yaml_config_reads_port_and_retry() {
        let yaml = "\
host: db.local
username: etl
port: 15432
retry:
  max_attempts: 3
  delay_ms: 1500
  backoff:
    kind: exponential
    max_delay_ms: 8000
";
        let config = ConnectionConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.password, "");
        assert_eq!(
            config.engine_url(DialectKind::PostgreSql, "sales"),
            "postgresql://etl:@db.local:15432/sales"
        );
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(
            config.retry.backoff,
            Backoff::Exponential { max_delay_ms: 8000 }
        );
        assert_eq!(
            config.retry.delay_after(1),
            std::time::Duration::from_millis(1500)
        );
    }

    #[test]
    fn missing_host_is_rejected() {
        assert!(ConnectionConfig::from_yaml_str("username: etl\n").is_err());
    }
}
