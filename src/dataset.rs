//! In-memory tabular dataset: named columns of [`Value`] cells.
//!
//! A [`Dataset`] is what tables are loaded into and saved from. Its two
//! invariants (equal column lengths, unique column names) are checked on
//! construction, so every other module can rely on them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{self, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("Column '{column}' has {actual} value(s), expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("Duplicate column name '{0}'")]
    DuplicateColumn(String),
    #[error("Row {row} has {actual} field(s), expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// Storage type of a column, derived from its non-null cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    Boolean,
    Integer,
    Float,
    DateTime,
    Text,
}

impl StorageKind {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            StorageKind::Boolean | StorageKind::Integer | StorageKind::Float
        )
    }

    /// Token a null cell renders as under this storage.
    pub fn null_token(self) -> &'static str {
        match self {
            StorageKind::Float => "nan",
            StorageKind::DateTime => "NaT",
            _ => "None",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    name: String,
    values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Builds a column from raw text fields, typing it the way a delimited
    /// file reader would: null markers become [`Value::Null`], and the column
    /// becomes integer, float or boolean storage only when every non-null
    /// field parses as such. Integers with leading zeros keep text storage.
    pub fn from_text<S: AsRef<str>>(name: impl Into<String>, fields: &[S]) -> Self {
        let name = name.into();
        let raw: Vec<Option<&str>> = fields
            .iter()
            .map(|field| {
                let field = field.as_ref();
                if data::is_null_token(field) {
                    None
                } else {
                    Some(field)
                }
            })
            .collect();
        let present = || raw.iter().flatten();

        if present().next().is_some() {
            let numerics: Option<Vec<data::Numeric>> = present()
                .map(|field| {
                    if data::has_leading_zero(field) {
                        None
                    } else {
                        data::parse_numeric(field)
                    }
                })
                .collect();
            if let Some(numerics) = numerics {
                let all_integers = numerics
                    .iter()
                    .all(|n| matches!(n, data::Numeric::Integer(_)));
                let mut parsed = numerics.into_iter();
                let values = raw
                    .iter()
                    .map(|field| match field {
                        None => Value::Null,
                        Some(_) => match parsed.next() {
                            Some(data::Numeric::Integer(i)) if !all_integers => {
                                Value::Float(i as f64)
                            }
                            Some(numeric) => numeric.into_value(),
                            None => Value::Null,
                        },
                    })
                    .collect();
                return Self { name, values };
            }

            if present().all(|field| data::parse_boolean(field).is_some()) {
                let values = raw
                    .iter()
                    .map(|field| {
                        field
                            .and_then(data::parse_boolean)
                            .map(Value::Boolean)
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                return Self { name, values };
            }
        }

        let values = raw
            .iter()
            .map(|field| match field {
                Some(text) => Value::String((*text).to_string()),
                None => Value::Null,
            })
            .collect();
        Self { name, values }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut Vec<Value> {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    pub fn storage(&self) -> StorageKind {
        let mut seen_bool = false;
        let mut seen_int = false;
        let mut seen_float = false;
        let mut seen_datetime = false;
        let mut seen_text = false;
        for value in &self.values {
            match value {
                Value::Null => {}
                Value::Boolean(_) => seen_bool = true,
                Value::Integer(_) => seen_int = true,
                Value::Float(_) => seen_float = true,
                Value::DateTime(_) => seen_datetime = true,
                Value::String(_) => seen_text = true,
            }
        }
        match (seen_bool, seen_int, seen_float, seen_datetime, seen_text) {
            (true, false, false, false, false) => StorageKind::Boolean,
            (false, true, false, false, false) => StorageKind::Integer,
            (false, _, true, false, false) => StorageKind::Float,
            (false, false, false, true, false) => StorageKind::DateTime,
            _ => StorageKind::Text,
        }
    }

    /// Every cell as text, nulls included, using the storage's null token.
    pub fn rendered(&self) -> impl Iterator<Item = String> + '_ {
        let null_token = self.storage().null_token();
        self.values.iter().map(move |value| match value {
            Value::Null => null_token.to_string(),
            other => other.as_display(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<Column>,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> Result<Self, DatasetError> {
        {
            let mut names = HashSet::with_capacity(columns.len());
            for column in &columns {
                if !names.insert(column.name()) {
                    return Err(DatasetError::DuplicateColumn(column.name().to_string()));
                }
            }
        }
        if let Some(first) = columns.first() {
            let expected = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != expected) {
                return Err(DatasetError::LengthMismatch {
                    column: bad.name().to_string(),
                    expected,
                    actual: bad.len(),
                });
            }
        }
        Ok(Self { columns })
    }

    /// Builds a dataset from row-major cells.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, DatasetError> {
        let width = headers.len();
        let mut columns: Vec<Vec<Value>> = (0..width).map(|_| Vec::with_capacity(rows.len())).collect();
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(DatasetError::RowWidth {
                    row: idx,
                    expected: width,
                    actual: row.len(),
                });
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.push(value);
            }
        }
        Self::new(
            headers
                .into_iter()
                .zip(columns)
                .map(|(name, values)| Column::new(name, values))
                .collect(),
        )
    }

    /// Builds a typed dataset from row-major text fields (see
    /// [`Column::from_text`]).
    pub fn from_text_rows(
        headers: Vec<String>,
        rows: &[Vec<String>],
    ) -> Result<Self, DatasetError> {
        let width = headers.len();
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(DatasetError::RowWidth {
                row: idx,
                expected: width,
                actual: row.len(),
            });
        }
        let columns = headers
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let fields: Vec<&str> = rows.iter().map(|row| row[idx].as_str()).collect();
                Column::from_text(name, &fields)
            })
            .collect();
        Self::new(columns)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.row_count() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values()[index]).collect())
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.row_count()).map(|idx| self.columns.iter().map(|c| &c.values()[idx]).collect())
    }

    /// Rendered text rows, suitable for printing.
    pub fn text_rows(&self) -> Vec<Vec<String>> {
        let rendered: Vec<Vec<String>> = self.columns.iter().map(|c| c.rendered().collect()).collect();
        (0..self.row_count())
            .map(|idx| rendered.iter().map(|col| col[idx].clone()).collect())
            .collect()
    }

    /// Returns a copy with a leading 0-based integer column named `name`.
    pub fn with_index_column(&self, name: &str) -> Result<Self, DatasetError> {
        let index = Column::new(
            name,
            (0..self.row_count() as i64).map(Value::Integer).collect(),
        );
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(index);
        columns.extend(self.columns.iter().cloned());
        Self::new(columns)
    }
}
