use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::Value;
use crate::schema::{InferenceOptions, TableSchema};

/// Name of the column holding the row index when [`SaveOptions::index`] is set.
pub const DEFAULT_INDEX_LABEL: &str = "index";

/// Options for reading a table or query result into a dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    /// Restrict a table read to these columns, in this order.
    pub columns: Option<Vec<String>>,
    /// Columns whose text cells are parsed into timestamps after the read.
    pub parse_dates: Vec<String>,
    /// Positional bind parameters for a query.
    pub params: Vec<Value>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_parse_dates<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parse_dates = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// What to do when the destination table already exists.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    Fail,
    #[default]
    Replace,
    Append,
}

impl FromStr for IfExists {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(IfExists::Fail),
            "replace" => Ok(IfExists::Replace),
            "append" => Ok(IfExists::Append),
            other => Err(format!(
                "Unknown if-exists mode '{other}'. Expected fail, replace or append"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOptions {
    /// Write the 0-based row position as a leading column.
    pub index: bool,
    pub index_label: String,
    pub if_exists: IfExists,
    /// Column types to use instead of inferred ones. Columns missing here
    /// fall back to inference.
    pub schema: Option<TableSchema>,
    pub inference: InferenceOptions,
    /// Rows per insert batch; the driver decides when unset.
    pub chunk_size: Option<usize>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            index: false,
            index_label: DEFAULT_INDEX_LABEL.to_string(),
            if_exists: IfExists::default(),
            schema: None,
            inference: InferenceOptions::default(),
            chunk_size: None,
        }
    }
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    pub fn with_if_exists(mut self, if_exists: IfExists) -> Self {
        self.if_exists = if_exists;
        self
    }

    pub fn with_schema(mut self, schema: TableSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_inference(mut self, inference: InferenceOptions) -> Self {
        self.inference = inference;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_defaults_replace_without_index() {
        let options = SaveOptions::default();
        assert_eq!(options.if_exists, IfExists::Replace);
        assert!(!options.index);
        assert_eq!(options.index_label, "index");
        assert!(options.schema.is_none());
    }

    #[test]
    fn if_exists_parses_case_insensitively() {
        assert_eq!("Append".parse::<IfExists>(), Ok(IfExists::Append));
        assert!("truncate".parse::<IfExists>().is_err());
    }

    #[test]
    fn chunk_size_is_at_least_one() {
        assert_eq!(SaveOptions::new().with_chunk_size(0).chunk_size, Some(1));
    }
}
