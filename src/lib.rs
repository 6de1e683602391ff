//! Load and save tabular datasets to MySQL, PostgreSQL and SQL Server.
//!
//! [`Database`] manages one cached engine per database, retries connection
//! attempts and releases every connection it opens. When a dataset is saved
//! to a new table, [`schema::infer_schema`] decides the column types.

pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod db;
pub mod dialect;
pub mod driver;
pub mod engine;
pub mod error;
pub mod infer;
pub mod io_utils;
pub mod options;
pub mod preview;
pub mod retry;
pub mod schema;
#[cfg(feature = "sqlx")]
pub mod sqlx_driver;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::cli::{Cli, Commands};

pub use crate::config::ConnectionConfig;
pub use crate::data::Value;
pub use crate::dataset::{Column, Dataset};
pub use crate::db::{Database, MsSqlDb, MySqlDb, PostgreSqlDb, ProcedureResult};
pub use crate::dialect::{DialectKind, MsSql, MySql, PostgreSql};
pub use crate::error::Error;
pub use crate::options::{IfExists, ReadOptions, SaveOptions};
pub use crate::retry::RetryPolicy;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("coralinedb", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Infer(args) => infer::execute(&args),
        Commands::Preview(args) => preview::execute(&args),
        Commands::Url(args) => handle_url(&args),
    }
}

fn handle_url(args: &cli::UrlArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ConnectionConfig::load(path)
            .with_context(|| format!("Loading connection config from {path:?}"))?,
        None => ConnectionConfig::new(
            args.host.clone().unwrap_or_default(),
            args.user.clone().unwrap_or_default(),
            args.password.clone(),
        ),
    };
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    let url = config.engine_url(args.dialect, args.database.as_deref().unwrap_or(""));
    info!(
        "{} URL for {}:{}",
        args.dialect,
        config.host,
        config.effective_port(args.dialect)
    );
    println!("{url}");
    Ok(())
}
