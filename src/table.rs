use std::borrow::Cow;
use std::fmt::Write as _;

use crate::dataset::Dataset;
use crate::schema::InferredSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
}

/// Renders up to `limit` rows of a dataset. Numeric columns are
/// right-aligned; nulls show the token of their column's storage.
pub fn render_dataset(dataset: &Dataset, limit: Option<usize>) -> String {
    let headers = dataset.column_names();
    let aligns = dataset
        .columns()
        .iter()
        .map(|column| {
            if column.storage().is_numeric() {
                Align::Right
            } else {
                Align::Left
            }
        })
        .collect::<Vec<_>>();
    let mut rows = dataset.text_rows();
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    render_grid(&headers, &rows, &aligns)
}

/// One line per column: what was observed and the SQL type chosen.
pub fn render_observations(inferred: &InferredSchema) -> String {
    let headers = ["column", "logical", "storage", "max_length", "decimals", "sql_type"]
        .map(String::from)
        .to_vec();
    let rows = inferred
        .observations
        .iter()
        .map(|obs| {
            vec![
                obs.name.clone(),
                obs.logical_type.to_string(),
                format!("{:?}", obs.storage),
                obs.max_length.to_string(),
                obs.decimal_digits.map(|d| d.to_string()).unwrap_or_default(),
                inferred
                    .sql_type(&obs.name)
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    let aligns = [
        Align::Left,
        Align::Left,
        Align::Left,
        Align::Right,
        Align::Right,
        Align::Left,
    ];
    render_grid(&headers, &rows, &aligns)
}

fn render_grid(headers: &[String], rows: &[Vec<String>], aligns: &[Align]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(&sanitize_cell(cell)));
        }
    }

    for width in &mut widths {
        *width = (*width).max(3);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths, &[]));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths, &[]));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths, aligns));
    }
    output
}

fn format_row(values: &[String], widths: &[usize], aligns: &[Align]) -> String {
    let cells = values
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(idx, (value, width))| {
            let sanitized = sanitize_cell(value);
            let padding = " ".repeat(width.saturating_sub(display_width(&sanitized)));
            match aligns.get(idx).copied().unwrap_or(Align::Left) {
                Align::Left => format!("{sanitized}{padding}"),
                Align::Right => format!("{padding}{sanitized}"),
            }
        })
        .collect::<Vec<_>>();
    cells.join("  ").trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
