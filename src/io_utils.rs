//! Delimited-file ingestion into a [`Dataset`].
//!
//! - **Delimiter**: an explicit choice wins; otherwise the header line is
//!   sniffed for the most frequent of `,`, `|` and tab.
//! - **Encoding**: input bytes are decoded with `encoding_rs`, defaulting to
//!   UTF-8.
//! - **Headers**: optionally simplified to lowercase snake_case.
//! - **stdin**: the `-` path reads standard input.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use regex::Regex;

use crate::dataset::Dataset;

pub const DEFAULT_DELIMITER: u8 = b',';
/// Delimiters considered when sniffing, in tie-break order.
pub const SNIFF_CANDIDATES: [u8; 3] = [b',', b'|', b'\t'];

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Picks whichever candidate occurs most often in the header line. Ties go
/// to the earlier candidate; a line with none of them yields a comma.
pub fn sniff_delimiter(first_line: &str) -> u8 {
    let mut best = DEFAULT_DELIMITER;
    let mut best_count = 0;
    for candidate in SNIFF_CANDIDATES {
        let count = first_line.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

fn non_identifier_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("[^a-z0-9 ]+").expect("static pattern compiles"))
}

/// Lowercases, drops everything but ASCII letters, digits and spaces, then
/// turns spaces into underscores: `"Unit Price ($)"` becomes `unit_price_`.
pub fn simplify_column_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    non_identifier_chars()
        .replace_all(&lowered, "")
        .replace(' ', "_")
}

pub fn simplify_column_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .iter()
        .map(|name| simplify_column_name(name.as_ref()))
        .collect()
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct FileReadOptions {
    /// Sniffed from the header line when unset.
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
    pub simplify_headers: bool,
    /// Stop after this many data rows.
    pub limit: Option<usize>,
}

/// Loads a delimited file (or stdin for `-`) into a typed dataset.
pub fn read_dataset(path: &Path, options: &FileReadOptions) -> Result<Dataset> {
    let encoding = resolve_encoding(options.encoding.as_deref())?;
    let bytes = read_input(path)?;
    let delimiter = match options.delimiter {
        Some(delimiter) => delimiter,
        None => {
            let line_end = bytes
                .iter()
                .position(|b| *b == b'\n')
                .unwrap_or(bytes.len());
            let (first_line, _, _) = encoding.decode(&bytes[..line_end]);
            let sniffed = sniff_delimiter(&first_line);
            debug!(
                "Sniffed delimiter {:?} from header of {path:?}",
                sniffed as char
            );
            sniffed
        }
    };

    let mut reader = open_csv_reader(bytes.as_slice(), delimiter, true);
    let raw_headers = decode_record(
        reader
            .byte_headers()
            .with_context(|| format!("Reading header row from {path:?}"))?,
        encoding,
    )?;
    let headers = if options.simplify_headers {
        simplify_column_names(&raw_headers)
    } else {
        raw_headers
    };

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    while options.limit.is_none_or(|limit| rows.len() < limit)
        && reader
            .read_byte_record(&mut record)
            .with_context(|| format!("Reading row {} from {path:?}", rows.len() + 2))?
    {
        rows.push(decode_record(&record, encoding)?);
    }
    debug!("Read {} row(s) from {path:?}", rows.len());

    Dataset::from_text_rows(headers, &rows)
        .with_context(|| format!("Building dataset from {path:?}"))
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if is_dash(path) {
        io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("Reading standard input")?;
    } else {
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        BufReader::new(file)
            .read_to_end(&mut bytes)
            .with_context(|| format!("Reading input file {path:?}"))?;
    }
    Ok(bytes)
}
