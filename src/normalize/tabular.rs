use serde_json::Value;

use super::{NormalizeOptions, Point, Row, SeriesAccumulator, TabularGrouping};
use crate::window::{TimeInstant, parse_instant};

pub const TIMESTAMP_COLUMNS: &[&str] = &["t", "time", "ts", "timestamp"];
pub const SERIES_COLUMNS: &[&str] = &["series", "metric"];
pub const VALUE_COLUMNS: &[&str] = &["value", "v"];
pub const NAME_COLUMN: &str = "name";
pub const DEFAULT_SERIES_NAME: &str = "value";

/// How a single row expands into points. Classified once per row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowShape<'a> {
    /// Composite mode: the row is an aggregate (status column equals the
    /// suppress sentinel) and is skipped.
    Suppressed,
    /// Composite mode: `{host=..,request=..,status=..}` naming.
    Composite { name: String, value: Option<f64> },
    /// A series column plus a value column.
    Explicit { name: String, value: Option<f64> },
    /// One series per native numeric column.
    NumericColumns(Vec<(&'a str, f64)>),
    /// Nothing numeric: coerce `value`/`v`, name from `name`.
    Generic { name: String, value: Option<f64> },
}

pub(super) fn normalize(rows: &[Row], options: &NormalizeOptions, accumulator: &mut SeriesAccumulator) {
    for row in rows {
        let Some(instant) = row_timestamp(row) else {
            continue;
        };

        match classify(row, options) {
            RowShape::Suppressed => {}
            RowShape::Composite { name, value }
            | RowShape::Explicit { name, value }
            | RowShape::Generic { name, value } => {
                if let Some(value) = value {
                    accumulator.push(&name, Point(instant, value));
                }
            }
            RowShape::NumericColumns(columns) => {
                for (column, value) in columns {
                    accumulator.push(column, Point(instant, value));
                }
            }
        }
    }
}

/// Timestamp from the first present alias column.
///
/// Numbers are taken as epoch milliseconds as given. Text is parsed as a date,
/// falling back to an integer string in milliseconds. A present but unusable
/// value rejects the row without consulting later aliases.
pub fn row_timestamp(row: &Row) -> Option<TimeInstant> {
    let raw = first_present(row, TIMESTAMP_COLUMNS)?;
    match raw {
        Value::Number(number) => number
            .as_f64()
            .filter(|millis| millis.is_finite())
            .map(|millis| millis.round() as i64),
        Value::String(text) => parse_instant(text),
        _ => None,
    }
}

/// Decide which expansion rule applies to `row`.
pub fn classify<'a>(row: &'a Row, options: &NormalizeOptions) -> RowShape<'a> {
    if options.tabular_grouping == TabularGrouping::Composite {
        if let Some(shape) = classify_composite(row, options) {
            return shape;
        }
    }

    if let Some(shape) = classify_explicit(row) {
        return shape;
    }

    let numeric = numeric_columns(row);
    if !numeric.is_empty() {
        return RowShape::NumericColumns(numeric);
    }

    classify_generic(row)
}

fn classify_composite(row: &Row, options: &NormalizeOptions) -> Option<RowShape<'static>> {
    let value = first_present(row, VALUE_COLUMNS)?;

    let parts: Vec<String> = options
        .composite_columns
        .iter()
        .filter_map(|column| {
            row.get(column.as_str())
                .and_then(cell_text)
                .map(|text| format!("{column}={text}"))
        })
        .collect();
    if parts.is_empty() {
        return None;
    }

    let status = row.get(options.status_column.as_str()).and_then(cell_text);
    if status.as_deref() == Some(options.suppress_status.as_str()) {
        return Some(RowShape::Suppressed);
    }

    Some(RowShape::Composite {
        name: format!("{{{}}}", parts.join(",")),
        value: cell_number(value),
    })
}

fn classify_explicit(row: &Row) -> Option<RowShape<'static>> {
    let name = first_present(row, SERIES_COLUMNS).and_then(cell_text)?;
    let value = first_present(row, VALUE_COLUMNS)?;
    Some(RowShape::Explicit {
        name,
        value: cell_number(value),
    })
}

fn numeric_columns(row: &Row) -> Vec<(&str, f64)> {
    row.iter()
        .filter(|(column, _)| !TIMESTAMP_COLUMNS.contains(&column.as_str()))
        .filter_map(|(column, cell)| match cell {
            Value::Number(number) => number.as_f64().map(|value| (column.as_str(), value)),
            _ => None,
        })
        .collect()
}

fn classify_generic(row: &Row) -> RowShape<'static> {
    let name = row
        .get(NAME_COLUMN)
        .and_then(cell_text)
        .unwrap_or_else(|| DEFAULT_SERIES_NAME.to_string());
    let value = first_present(row, VALUE_COLUMNS).and_then(cell_number);
    RowShape::Generic { name, value }
}

fn first_present<'a>(row: &'a Row, columns: &[&str]) -> Option<&'a Value> {
    columns
        .iter()
        .filter_map(|column| row.get(*column))
        .find(|cell| !cell.is_null())
}

fn cell_text(cell: &Value) -> Option<String> {
    match cell {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Numbers as-is, numeric text parsed (64-bit integers arrive quoted).
fn cell_number(cell: &Value) -> Option<f64> {
    match cell {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}
