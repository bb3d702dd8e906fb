use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Milliseconds since the Unix epoch.
pub type TimeInstant = i64;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Concrete `[start, end]` pair, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: TimeInstant,
    pub end: TimeInstant,
}

impl TimeWindow {
    pub fn start_seconds(&self) -> i64 {
        self.start.div_euclid(1000)
    }

    pub fn end_seconds(&self) -> i64 {
        self.end.div_euclid(1000)
    }

    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}

/// "Last N" ranges offered to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePreset {
    LastHour,
    Last6Hours,
    Last24Hours,
    Last2Days,
    Last7Days,
}

impl RangePreset {
    /// Unknown labels fall back to the last hour.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "1h" => RangePreset::LastHour,
            "6h" => RangePreset::Last6Hours,
            "24h" => RangePreset::Last24Hours,
            "2d" => RangePreset::Last2Days,
            "7d" => RangePreset::Last7Days,
            _ => RangePreset::LastHour,
        }
    }

    pub const fn seconds(self) -> i64 {
        match self {
            RangePreset::LastHour => 3_600,
            RangePreset::Last6Hours => 6 * 3_600,
            RangePreset::Last24Hours => 24 * 3_600,
            RangePreset::Last2Days => 2 * 24 * 3_600,
            RangePreset::Last7Days => 7 * 24 * 3_600,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            RangePreset::LastHour => "1h",
            RangePreset::Last6Hours => "6h",
            RangePreset::Last24Hours => "24h",
            RangePreset::Last2Days => "2d",
            RangePreset::Last7Days => "7d",
        }
    }
}

/// What the operator picked: a preset re-evaluated on every run, or frozen bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowSpec {
    Preset {
        range: String,
    },
    Explicit {
        start: Option<String>,
        end: Option<String>,
    },
}

impl Default for WindowSpec {
    fn default() -> Self {
        WindowSpec::Preset {
            range: RangePreset::LastHour.label().to_string(),
        }
    }
}

impl WindowSpec {
    /// Build from the range selector: `custom` means explicit bounds.
    pub fn from_range(range: Option<&str>, start: Option<String>, end: Option<String>) -> Self {
        match range.map(str::trim) {
            Some("custom") => WindowSpec::Explicit { start, end },
            Some(label) => WindowSpec::Preset {
                range: label.to_string(),
            },
            None => WindowSpec::default(),
        }
    }

    pub fn resolve(&self) -> Result<TimeWindow, QueryError> {
        self.resolve_at(Utc::now().timestamp_millis())
    }

    pub fn resolve_at(&self, now: TimeInstant) -> Result<TimeWindow, QueryError> {
        match self {
            WindowSpec::Preset { range } => {
                let preset = RangePreset::from_label(range);
                Ok(TimeWindow {
                    start: now - preset.seconds() * 1_000,
                    end: now,
                })
            }
            WindowSpec::Explicit { start, end } => {
                let start = parse_bound("start", start.as_deref())?;
                let end = parse_bound("end", end.as_deref())?;
                if start > end {
                    return Err(QueryError::InvalidWindow(format!(
                        "start ({start}) is after end ({end})"
                    )));
                }
                Ok(TimeWindow { start, end })
            }
        }
    }
}

fn parse_bound(which: &str, raw: Option<&str>) -> Result<TimeInstant, QueryError> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| QueryError::InvalidWindow(format!("missing {which} bound")))?;

    parse_instant(raw)
        .ok_or_else(|| QueryError::InvalidWindow(format!("unparseable {which} bound: {raw}")))
}

/// Parse a date-like string into epoch milliseconds.
///
/// RFC 3339 keeps its offset; naive date-times and bare dates are read as UTC.
/// A string that is not a date but is an integer is taken as epoch milliseconds.
pub fn parse_instant(raw: &str) -> Option<TimeInstant> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc().timestamp_millis());
    }

    raw.parse::<i64>().ok()
}
