//! Turns backend-shaped query results into one uniform set of named series.
//!
//! Two strategies live here, picked by the shape of the raw result:
//!
//! - **label vector** (Prometheus `query_range`): every input series carries a
//!   label set; the name is derived from the labels and every sample is
//!   converted from seconds to milliseconds.
//! - **tabular** (ClickHouse JSON rows): the row schema is unknown, so each row
//!   is classified into a [`tabular::RowShape`] and expanded into points.
//!
//! Neither strategy fails. Garbled samples or rows only drop the affected
//! points; the rest of the batch survives.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::window::TimeInstant;

pub mod label_vector;
pub mod tabular;

pub use tabular::RowShape;

/// One open-schema row from the tabular backend.
pub type Row = serde_json::Map<String, Value>;

/// Backend-shaped payload as returned by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum RawQueryResult {
    LabelVector(Vec<LabelSeries>),
    Tabular(Vec<Row>),
}

/// One label-vector series. Samples stay raw `[instant_seconds, "value"]`
/// pairs so a malformed sample drops a point instead of the whole response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelSeries {
    #[serde(default, rename = "metric")]
    pub labels: IndexMap<String, String>,
    #[serde(default, rename = "values")]
    pub samples: Vec<Value>,
}

/// `(instant_ms, value)`; serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point(pub TimeInstant, pub f64);

impl Point {
    pub fn instant(&self) -> TimeInstant {
        self.0
    }

    pub fn value(&self) -> f64 {
        self.1
    }
}

/// A named series with points sorted ascending by instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub points: Vec<Point>,
}

/// How rows without an explicit series column are grouped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabularGrouping {
    /// Explicit series column, then one series per numeric column, then the
    /// generic `name`/`value` fallback.
    #[default]
    Generic,
    /// Compose names from identity columns (`host`, `request`, `status`) and
    /// drop aggregate rows, falling back to `Generic` for rows without them.
    Composite,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NormalizeOptions {
    #[serde(default)]
    pub tabular_grouping: TabularGrouping,
    #[serde(default = "NormalizeOptions::default_composite_columns")]
    pub composite_columns: Vec<String>,
    /// Column compared against `suppress_status` in composite mode.
    #[serde(default = "NormalizeOptions::default_status_column")]
    pub status_column: String,
    #[serde(default = "NormalizeOptions::default_suppress_status")]
    pub suppress_status: String,
}

impl NormalizeOptions {
    fn default_composite_columns() -> Vec<String> {
        vec!["host".into(), "request".into(), "status".into()]
    }

    fn default_status_column() -> String {
        "status".into()
    }

    fn default_suppress_status() -> String {
        "all".into()
    }

    pub fn composite() -> Self {
        Self {
            tabular_grouping: TabularGrouping::Composite,
            ..Self::default()
        }
    }
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            tabular_grouping: TabularGrouping::default(),
            composite_columns: Self::default_composite_columns(),
            status_column: Self::default_status_column(),
            suppress_status: Self::default_suppress_status(),
        }
    }
}

/// Normalize a raw result into series, merging same-named inputs.
pub fn normalize(raw: &RawQueryResult, options: &NormalizeOptions) -> Vec<Series> {
    let mut accumulator = SeriesAccumulator::default();
    match raw {
        RawQueryResult::LabelVector(series) => label_vector::normalize(series, &mut accumulator),
        RawQueryResult::Tabular(rows) => tabular::normalize(rows, options, &mut accumulator),
    }
    accumulator.finish()
}

/// Points keyed by derived series name, in first-seen order.
#[derive(Debug, Default)]
pub(crate) struct SeriesAccumulator {
    groups: IndexMap<String, Vec<Point>>,
}

impl SeriesAccumulator {
    pub(crate) fn push(&mut self, name: &str, point: Point) {
        match self.groups.get_mut(name) {
            Some(points) => points.push(point),
            None => {
                self.groups.insert(name.to_string(), vec![point]);
            }
        }
    }

    /// Registers a series even when none of its points survive.
    pub(crate) fn touch(&mut self, name: &str) {
        if !self.groups.contains_key(name) {
            self.groups.insert(name.to_string(), Vec::new());
        }
    }

    pub(crate) fn finish(self) -> Vec<Series> {
        self.groups
            .into_iter()
            .map(|(name, mut points)| {
                // stable: equal instants keep arrival order
                points.sort_by_key(Point::instant);
                Series { name, points }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accumulator_merges_and_sorts() {
        let mut acc = SeriesAccumulator::default();
        acc.push("a", Point(3_000, 3.0));
        acc.push("b", Point(1_000, 9.0));
        acc.push("a", Point(1_000, 1.0));
        acc.push("a", Point(2_000, 2.0));

        let series = acc.finish();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name, "a");
        assert_eq!(
            series[0].points,
            vec![Point(1_000, 1.0), Point(2_000, 2.0), Point(3_000, 3.0)]
        );
        assert_eq!(series[1].name, "b");
    }

    #[test]
    fn point_serializes_as_pair() {
        let encoded = serde_json::to_value(Point(1_000, 2.5)).expect("encode");
        assert_eq!(encoded, json!([1000, 2.5]));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: NormalizeOptions =
            serde_yaml::from_str("tabular_grouping: composite").expect("yaml");
        assert_eq!(options.tabular_grouping, TabularGrouping::Composite);
        assert_eq!(options.composite_columns, vec!["host", "request", "status"]);
        assert_eq!(options.status_column, "status");
        assert_eq!(options.suppress_status, "all");
    }
}
