use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::dialect::DialectKind;
use crate::schema::NumericTextPolicy;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Infer SQL schemas for tabular files and build database connection URLs",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Infer SQL column types for a delimited file
    Infer(InferArgs),
    /// Preview the first rows of a delimited file as a typed table
    Preview(PreviewArgs),
    /// Print the engine URL for a dialect and connection settings
    Url(UrlArgs),
}

#[derive(Debug, Args)]
pub struct InferArgs {
    /// Input file to inspect ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Field delimiter (sniffed from the header line when omitted)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Lowercase and snake_case the header names
    #[arg(long)]
    pub simplify_headers: bool,
    /// How to type text columns whose every value is a number
    #[arg(long = "numeric-text", value_enum, default_value_t = NumericTextPolicy::KeepString)]
    pub numeric_text: NumericTextPolicy,
    /// Write the inferred schema to this file (JSON for `.json`, YAML otherwise)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Print CREATE TABLE DDL for this dialect instead of the observation table
    #[arg(long, value_enum, requires = "table")]
    pub ddl: Option<DialectKind>,
    /// Table name used in the DDL
    #[arg(long)]
    pub table: Option<String>,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Input file to preview ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
    /// Field delimiter (sniffed from the header line when omitted)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding for input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Lowercase and snake_case the header names
    #[arg(long)]
    pub simplify_headers: bool,
}

#[derive(Debug, Args)]
pub struct UrlArgs {
    #[arg(long, value_enum)]
    pub dialect: DialectKind,
    /// YAML connection config providing host, credentials and port
    #[arg(long, conflicts_with_all = ["host", "user", "password"])]
    pub config: Option<PathBuf>,
    #[arg(long, required_unless_present = "config")]
    pub host: Option<String>,
    #[arg(long, required_unless_present = "config")]
    pub user: Option<String>,
    #[arg(long, default_value = "")]
    pub password: String,
    /// Overrides the dialect's default port
    #[arg(long)]
    pub port: Option<u16>,
    /// Database name; omit for a server-level URL
    #[arg(long)]
    pub database: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
