//! Request shaping and response decoding for the proxy contract.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::normalize::{LabelSeries, Row};
use crate::window::TimeWindow;

pub const DEFAULT_STEP_SECONDS: u64 = 15;
pub const START_PLACEHOLDER: &str = "{{start}}";
pub const END_PLACEHOLDER: &str = "{{end}}";

static FORMAT_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bformat\s+json\b").expect("static regex compiles")
});

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    data: Option<RangeData>,
}

#[derive(Debug, Deserialize)]
struct RangeData {
    #[serde(default)]
    result: Vec<LabelSeries>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TabularResponse {
    Rows(Vec<Value>),
    Wrapped {
        #[serde(default)]
        data: Vec<Value>,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    #[serde(default)]
    details: Option<Value>,
}

/// Sampling interval in seconds: default 15, never below 1.
pub fn effective_step(step: Option<u64>) -> u64 {
    step.unwrap_or(DEFAULT_STEP_SECONDS).max(1)
}

/// Textual `{{start}}` / `{{end}}` substitution with millisecond bounds.
pub fn bind_time_placeholders(sql: &str, window: &TimeWindow) -> String {
    sql.replace(START_PLACEHOLDER, &window.start.to_string())
        .replace(END_PLACEHOLDER, &window.end.to_string())
}

/// Append `FORMAT JSON` unless the statement already asks for it.
pub fn ensure_json_format(sql: &str) -> String {
    if FORMAT_JSON.is_match(sql) {
        sql.to_string()
    } else {
        format!("{}\nFORMAT JSON", sql.trim())
    }
}

pub fn decode_label_vector(body: &[u8]) -> Result<Vec<LabelSeries>, serde_json::Error> {
    let response: RangeResponse = serde_json::from_slice(body)?;
    Ok(response.data.map(|data| data.result).unwrap_or_default())
}

/// Bare row array or `{data: [...]}`; non-object entries are skipped.
pub fn decode_tabular(body: &[u8]) -> Result<Vec<Row>, serde_json::Error> {
    let rows = match serde_json::from_slice::<TabularResponse>(body)? {
        TabularResponse::Rows(rows) => rows,
        TabularResponse::Wrapped { data } => data,
    };
    Ok(rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

/// Best human-readable message from a non-success proxy body.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(error),
            details,
        }) => match details {
            Some(Value::String(detail)) if !detail.is_empty() => format!("{error}: {detail}"),
            Some(Value::Object(map)) => match map.get("error").and_then(Value::as_str) {
                Some(detail) => format!("{error}: {detail}"),
                None => error,
            },
            _ => error,
        },
        _ if body.trim().is_empty() => "empty response body".to_string(),
        _ => body.trim().to_string(),
    }
}
