use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Markers that a tabular reader treats as a missing value.
const NULL_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-NaN", "-nan", "<NA>", "N/A", "NA", "NULL", "NaN", "None",
    "n/a", "nan", "null", "NaT",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text form of a non-null cell. Nulls render as an empty string here;
    /// storage-aware null rendering lives in the schema module.
    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Boolean(b) => if *b { "True" } else { "False" }.to_string(),
            Value::DateTime(dt) => format_datetime(dt),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Renders floats the way a dataframe prints them: integral values keep a
/// trailing `.0` so they stay distinguishable from integers.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

pub fn format_datetime(value: &NaiveDateTime) -> String {
    if value.nanosecond() == 0 {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S%.f").to_string()
    }
}

/// Number of fractional digits a rendered decimal carries once trailing
/// zeros are stripped (`"2.250"` → 2, `"3.0"` → 0).
pub fn fractional_digits(rendered: &str) -> u32 {
    let Some((_, fraction)) = rendered.split_once('.') else {
        return 0;
    };
    let fraction = fraction
        .split(['e', 'E'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('0');
    fraction.chars().filter(char::is_ascii_digit).count() as u32
}

pub fn is_null_token(value: &str) -> bool {
    NULL_TOKENS.contains(&value.trim())
}

/// How an all-numeric date such as `01/02/2021` is read. One order is chosen
/// per column so every cell agrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayMonthOrder {
    MonthFirst,
    DayFirst,
}

impl DayMonthOrder {
    /// Tried in this order; month-first wins when both fit.
    pub const CANDIDATES: [DayMonthOrder; 2] = [DayMonthOrder::MonthFirst, DayMonthOrder::DayFirst];

    fn date_formats(self) -> &'static [&'static str] {
        match self {
            DayMonthOrder::MonthFirst => &["%m/%d/%Y", "%m-%d-%Y"],
            DayMonthOrder::DayFirst => &["%d/%m/%Y", "%d-%m-%Y"],
        }
    }

    fn datetime_formats(self) -> &'static [&'static str] {
        match self {
            DayMonthOrder::MonthFirst => &[
                "%m/%d/%Y %H:%M:%S%.f",
                "%m-%d-%Y %H:%M:%S%.f",
                "%m/%d/%Y %H:%M",
                "%m-%d-%Y %H:%M",
            ],
            DayMonthOrder::DayFirst => &[
                "%d/%m/%Y %H:%M:%S%.f",
                "%d-%m-%Y %H:%M:%S%.f",
                "%d/%m/%Y %H:%M",
                "%d-%m-%Y %H:%M",
            ],
        }
    }
}

/// Layouts whose reading does not depend on the day/month order: year-first
/// numeric dates and dates that spell out the month.
const UNAMBIGUOUS_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%b-%Y",
    "%d-%B-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
];

const UNAMBIGUOUS_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d-%b-%Y %H:%M:%S%.f",
    "%d-%B-%Y %H:%M:%S%.f",
    "%d %b %Y %H:%M:%S%.f",
    "%d %B %Y %H:%M:%S%.f",
    "%b %d, %Y %H:%M:%S%.f",
    "%B %d, %Y %H:%M:%S%.f",
    "%b %d %Y %H:%M:%S%.f",
    "%B %d %Y %H:%M:%S%.f",
];

pub fn parse_naive_date(value: &str, order: DayMonthOrder) -> Result<NaiveDate> {
    for fmt in UNAMBIGUOUS_DATE_FORMATS.iter().chain(order.date_formats()) {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str, order: DayMonthOrder) -> Result<NaiveDateTime> {
    for fmt in UNAMBIGUOUS_DATETIME_FORMATS
        .iter()
        .chain(order.datetime_formats())
    {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Locale-independent parser accepting any of the supported date, datetime
/// and RFC 3339 layouts under a fixed day/month order. Offsets are dropped
/// after converting to the local wall-clock time of the value.
pub fn parse_datetime_with(value: &str, order: DayMonthOrder) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.naive_local());
    }
    if let Ok(parsed) = parse_naive_datetime(trimmed, order) {
        return Ok(parsed);
    }
    if let Ok(date) = parse_naive_date(trimmed, order) {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }
    Err(anyhow!("Failed to parse '{value}' as a date or time"))
}

/// Parses a lone value, month-first when the order is ambiguous.
pub fn parse_datetime(value: &str) -> Result<NaiveDateTime> {
    parse_datetime_with(value, DayMonthOrder::MonthFirst)
}

/// Parses a whole column of values with one day/month order: the first
/// candidate under which every value parses. `None` if no order fits.
pub fn parse_datetime_column<S: AsRef<str>>(values: &[S]) -> Option<Vec<NaiveDateTime>> {
    DayMonthOrder::CANDIDATES.into_iter().find_map(|order| {
        values
            .iter()
            .map(|value| parse_datetime_with(value.as_ref(), order).ok())
            .collect()
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Integer(i64),
    Float(f64),
}

impl Numeric {
    pub fn into_value(self) -> Value {
        match self {
            Numeric::Integer(i) => Value::Integer(i),
            Numeric::Float(f) => Value::Float(f),
        }
    }
}

/// Parses a plain numeric literal: optional sign, digits, optional fraction
/// and exponent. Words such as `inf` or `nan` are rejected.
pub fn parse_numeric(value: &str) -> Option<Numeric> {
    let trimmed = value.trim();
    let body = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    if body.is_empty() || !body.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return None;
    }
    if body.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(parsed) = trimmed.parse::<i64>() {
            return Some(Numeric::Integer(parsed));
        }
    }
    trimmed.parse::<f64>().ok().map(Numeric::Float)
}

/// True when the literal is an integer written with a redundant leading zero
/// (`007`, `-01`). Such values are identifiers, not quantities.
pub fn has_leading_zero(value: &str) -> bool {
    let trimmed = value.trim();
    let body = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    body.len() > 1 && body.starts_with('0') && body.chars().all(|c| c.is_ascii_digit())
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
