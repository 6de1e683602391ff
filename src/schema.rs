//! Column-type inference and SQL schema model.
//!
//! Inference runs in two stages. Classification assigns every column a
//! [`LogicalType`] (datetime, numeric or string), converting datetime columns
//! to parsed timestamps along the way. Mapping then turns each column's
//! effective storage plus what was observed in its cells (longest rendered
//! value, deepest fractional part) into a concrete [`SqlColumnType`].
//!
//! ## Mapping rules
//!
//! - boolean and integer storage → `INTEGER`
//! - float storage → `DECIMAL(p, s)` with `p` the rounded max length and `s`
//!   the most fractional digits observed
//! - datetime → `DATETIME`
//! - anything else → `VARCHAR(n)` with `n` the rounded max length, or `TEXT`
//!   once `n` exceeds [`VARCHAR_MAX_LENGTH`]
//!
//! Lengths are rounded up to the next multiple of ten so later appends of
//! slightly longer values still fit.

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow, bail};
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{
    data::{self, Numeric, Value},
    dataset::{Column, Dataset, StorageKind},
    dialect::DialectKind,
};

/// Longest rounded length still stored as `VARCHAR`.
pub const VARCHAR_MAX_LENGTH: u32 = 1000;
const LENGTH_STEP: u32 = 10;

/// Text markers treated as missing during datetime detection.
const DATETIME_NULL_MARKERS: &[&str] = &["NaT", "NaN", "nan"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalType {
    DateTime,
    Numeric,
    String,
}

impl LogicalType {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicalType::DateTime => "DATETIME",
            LogicalType::Numeric => "NUMERIC",
            LogicalType::String => "STRING",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a text column whose every value parses as a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NumericTextPolicy {
    /// Keep it as a string column; the text was stored that way on purpose.
    #[default]
    #[value(name = "keep")]
    KeepString,
    /// Convert it to integer or float storage.
    #[value(name = "promote")]
    Promote,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferenceOptions {
    pub numeric_text: NumericTextPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnObservation {
    pub name: String,
    pub logical_type: LogicalType,
    /// Storage after classification (datetime columns report `DateTime`).
    pub storage: StorageKind,
    /// Longest rendered value, rounded up to a multiple of ten.
    pub max_length: u32,
    /// Most fractional digits seen, for float storage only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_digits: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlColumnType {
    Integer,
    Decimal { precision: u32, scale: u32 },
    DateTime,
    Varchar(u32),
    Text,
}

impl SqlColumnType {
    /// Column type as written in DDL for the given dialect.
    pub fn to_sql(self, dialect: DialectKind) -> String {
        match self {
            SqlColumnType::DateTime => dialect.datetime_type().to_string(),
            SqlColumnType::Text => dialect.unbounded_text_type().to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for SqlColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlColumnType::Integer => f.write_str("INTEGER"),
            SqlColumnType::Decimal { precision, scale } => {
                write!(f, "DECIMAL({precision}, {scale})")
            }
            SqlColumnType::DateTime => f.write_str("DATETIME"),
            SqlColumnType::Varchar(length) => write!(f, "VARCHAR({length})"),
            SqlColumnType::Text => f.write_str("TEXT"),
        }
    }
}

impl FromStr for SqlColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "INTEGER" | "INT" => return Ok(SqlColumnType::Integer),
            "DATETIME" | "TIMESTAMP" => return Ok(SqlColumnType::DateTime),
            "TEXT" => return Ok(SqlColumnType::Text),
            _ => {}
        }
        let (head, args) = normalized
            .strip_suffix(')')
            .and_then(|rest| rest.split_once('('))
            .ok_or_else(|| anyhow!("Unsupported column type '{value}'"))?;
        let args: Vec<u32> = args
            .split(',')
            .map(|arg| {
                arg.trim()
                    .parse::<u32>()
                    .with_context(|| format!("Invalid argument '{arg}' in column type '{value}'"))
            })
            .collect::<Result<_>>()?;
        match (head.trim(), args.as_slice()) {
            ("VARCHAR", [length]) => Ok(SqlColumnType::Varchar(*length)),
            ("DECIMAL" | "NUMERIC", [precision]) => Ok(SqlColumnType::Decimal {
                precision: *precision,
                scale: 0,
            }),
            ("DECIMAL" | "NUMERIC", [precision, scale]) => {
                if scale > precision {
                    bail!("Decimal scale ({scale}) cannot exceed precision ({precision})");
                }
                Ok(SqlColumnType::Decimal {
                    precision: *precision,
                    scale: *scale,
                })
            }
            _ => bail!("Unsupported column type '{value}'"),
        }
    }
}

impl Serialize for SqlColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SqlColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        SqlColumnType::from_str(&raw).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub sql_type: SqlColumnType,
}

/// Target column types for one table, in dataset column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn get(&self, name: &str) -> Option<SqlColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.sql_type)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `CREATE TABLE` statement with every column nullable.
    pub fn create_table_sql(&self, dialect: DialectKind, table: &str) -> String {
        let definitions = self
            .columns
            .iter()
            .map(|col| {
                format!(
                    "  {} {}",
                    dialect.quote_identifier(&col.name),
                    col.sql_type.to_sql(dialect)
                )
            })
            .join(",\n");
        format!(
            "CREATE TABLE {} (\n{}\n);",
            dialect.quote_identifier(table),
            definitions
        )
    }

    /// Writes the schema as YAML, or JSON when the path ends in `.json`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        if is_json_path(path) {
            serde_json::to_writer_pretty(file, self).context("Writing schema JSON")
        } else {
            serde_yaml::to_writer(file, self).context("Writing schema YAML")
        }
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing schema to YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema: Self = if is_json_path(path) {
            serde_json::from_reader(reader)
                .with_context(|| format!("Parsing schema file {path:?}"))?
        } else {
            serde_yaml::from_reader(reader)
                .with_context(|| format!("Parsing schema file {path:?}"))?
        };
        Ok(schema)
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredSchema {
    pub observations: Vec<ColumnObservation>,
    pub schema: TableSchema,
}

impl InferredSchema {
    pub fn observation(&self, name: &str) -> Option<&ColumnObservation> {
        self.observations.iter().find(|o| o.name == name)
    }

    pub fn logical_type(&self, name: &str) -> Option<LogicalType> {
        self.observation(name).map(|o| o.logical_type)
    }

    pub fn sql_type(&self, name: &str) -> Option<SqlColumnType> {
        self.schema.get(name)
    }
}

pub fn infer_schema(dataset: &Dataset) -> InferredSchema {
    infer_schema_with(dataset, &InferenceOptions::default())
}

/// Classifies every column and maps it to a SQL type. The dataset is not
/// modified; use [`normalize_dataset`] to apply the conversions it implies.
pub fn infer_schema_with(dataset: &Dataset, options: &InferenceOptions) -> InferredSchema {
    let mut observations = Vec::with_capacity(dataset.column_count());
    let mut columns = Vec::with_capacity(dataset.column_count());

    for column in dataset.columns() {
        let (logical_type, converted) = classify_column(column, options);
        let effective = converted.as_ref().unwrap_or(column);
        let storage = effective.storage();
        let max_length = rounded_max_length(effective);
        let decimal_digits = (storage == StorageKind::Float).then(|| max_decimal_digits(effective));
        let sql_type = map_column_type(effective);
        debug!(
            "Column '{}' classified {} ({:?} storage) -> {}",
            column.name(),
            logical_type,
            storage,
            sql_type
        );
        observations.push(ColumnObservation {
            name: column.name().to_string(),
            logical_type,
            storage,
            max_length,
            decimal_digits,
        });
        columns.push(ColumnSchema {
            name: column.name().to_string(),
            sql_type,
        });
    }

    InferredSchema {
        observations,
        schema: TableSchema { columns },
    }
}

/// Applies the conversions behind an inference result in place: datetime
/// columns receive parsed timestamps and promoted numeric text becomes
/// numeric storage.
pub fn normalize_dataset(dataset: &mut Dataset, inferred: &InferredSchema) {
    for column in dataset.columns_mut() {
        let Some(observation) = inferred.observation(column.name()) else {
            continue;
        };
        let converted = match (observation.logical_type, column.storage()) {
            (LogicalType::DateTime, StorageKind::DateTime) => None,
            (LogicalType::DateTime, _) => convert_datetimes(column),
            (LogicalType::Numeric, StorageKind::Text) => convert_numerics(column),
            _ => None,
        };
        if let Some(values) = converted {
            *column.values_mut() = values;
        }
    }
}

fn classify_column(column: &Column, options: &InferenceOptions) -> (LogicalType, Option<Column>) {
    let storage = column.storage();
    if storage == StorageKind::DateTime {
        return (LogicalType::DateTime, None);
    }
    if let Some(values) = convert_datetimes(column) {
        return (
            LogicalType::DateTime,
            Some(Column::new(column.name(), values)),
        );
    }
    if storage.is_numeric() {
        return (LogicalType::Numeric, None);
    }
    match convert_numerics(column) {
        Some(values) if options.numeric_text == NumericTextPolicy::Promote => (
            LogicalType::Numeric,
            Some(Column::new(column.name(), values)),
        ),
        _ => (LogicalType::String, None),
    }
}

/// Parsed timestamps for every cell, or `None` unless at least one value is
/// present and every present value parses under one day/month order.
fn convert_datetimes(column: &Column) -> Option<Vec<Value>> {
    let mut pending = Vec::new();
    for (idx, value) in column.values().iter().enumerate() {
        match value {
            Value::Null | Value::DateTime(_) => {}
            Value::Float(f) if f.is_nan() => {}
            other => {
                let rendered = other.as_display();
                if !DATETIME_NULL_MARKERS.contains(&rendered.as_str()) {
                    pending.push((idx, rendered));
                }
            }
        }
    }
    let texts: Vec<&str> = pending.iter().map(|(_, text)| text.as_str()).collect();
    let parsed = data::parse_datetime_column(&texts)?;

    let mut converted: Vec<Value> = column
        .values()
        .iter()
        .map(|value| match value {
            Value::DateTime(dt) => Value::DateTime(*dt),
            _ => Value::Null,
        })
        .collect();
    let any_present = !pending.is_empty() || converted.iter().any(|v| !v.is_null());
    for ((idx, _), timestamp) in pending.iter().zip(parsed) {
        converted[*idx] = Value::DateTime(timestamp);
    }
    any_present.then_some(converted)
}

/// Numeric cells for a column whose non-null values all parse as numbers.
/// Integers widen to floats when any value has a fractional part.
fn convert_numerics(column: &Column) -> Option<Vec<Value>> {
    let mut parsed = Vec::with_capacity(column.len());
    let mut any_present = false;
    for value in column.values() {
        let numeric = match value {
            Value::Null => None,
            Value::Integer(i) => Some(Numeric::Integer(*i)),
            Value::Float(f) => Some(Numeric::Float(*f)),
            other => Some(data::parse_numeric(&other.as_display())?),
        };
        any_present |= numeric.is_some();
        parsed.push(numeric);
    }
    if !any_present {
        return None;
    }
    let widen = parsed
        .iter()
        .flatten()
        .any(|n| matches!(n, Numeric::Float(_)));
    Some(
        parsed
            .into_iter()
            .map(|numeric| match numeric {
                None => Value::Null,
                Some(Numeric::Integer(i)) if widen => Value::Float(i as f64),
                Some(n) => n.into_value(),
            })
            .collect(),
    )
}

/// SQL type for a column based on its storage and observed data, regardless
/// of how the storage came about.
pub fn map_column_type(column: &Column) -> SqlColumnType {
    match column.storage() {
        StorageKind::Boolean | StorageKind::Integer => SqlColumnType::Integer,
        StorageKind::Float => SqlColumnType::Decimal {
            precision: rounded_max_length(column),
            scale: max_decimal_digits(column),
        },
        StorageKind::DateTime => SqlColumnType::DateTime,
        StorageKind::Text => {
            let length = rounded_max_length(column).max(LENGTH_STEP);
            if length <= VARCHAR_MAX_LENGTH {
                SqlColumnType::Varchar(length)
            } else {
                SqlColumnType::Text
            }
        }
    }
}

/// Longest rendered cell (nulls included) rounded up to a multiple of ten.
pub fn rounded_max_length(column: &Column) -> u32 {
    let longest = column
        .rendered()
        .map(|text| text.chars().count())
        .max()
        .unwrap_or(0) as u32;
    round_up(longest)
}

/// Most fractional digits in any non-null float cell.
pub fn max_decimal_digits(column: &Column) -> u32 {
    column
        .values()
        .iter()
        .filter_map(|value| match value {
            Value::Float(f) if f.is_finite() => Some(data::fractional_digits(&data::format_float(*f))),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

fn round_up(length: u32) -> u32 {
    length.div_ceil(LENGTH_STEP) * LENGTH_STEP
}
