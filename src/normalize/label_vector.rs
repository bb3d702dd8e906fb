use indexmap::IndexMap;
use serde_json::Value;

use super::{LabelSeries, Point, SeriesAccumulator};

const METRIC_NAME_LABEL: &str = "__name__";
const FALLBACK_BASE: &str = "series";
const EMPTY_LABELS_NAME: &str = "value";

pub(super) fn normalize(series: &[LabelSeries], accumulator: &mut SeriesAccumulator) {
    for input in series {
        let name = series_name(&input.labels);
        accumulator.touch(&name);
        for point in input.samples.iter().filter_map(sample_point) {
            accumulator.push(&name, point);
        }
    }
}

/// `up{job=x,instance=a}` in the label order received.
pub fn series_name(labels: &IndexMap<String, String>) -> String {
    if labels.is_empty() {
        return EMPTY_LABELS_NAME.to_string();
    }

    let base = labels
        .get(METRIC_NAME_LABEL)
        .map(String::as_str)
        .unwrap_or(FALLBACK_BASE);

    let rest: Vec<String> = labels
        .iter()
        .filter(|(key, _)| key.as_str() != METRIC_NAME_LABEL)
        .map(|(key, value)| format!("{key}={value}"))
        .collect();

    if rest.is_empty() {
        base.to_string()
    } else {
        format!("{base}{{{}}}", rest.join(","))
    }
}

/// `[instant_seconds, "value"]` → `(instant_ms, value)`.
///
/// Non-finite values that parse (`NaN`, `+Inf`) are kept; anything that does
/// not parse drops the sample.
fn sample_point(sample: &Value) -> Option<Point> {
    let pair = sample.as_array()?;
    let seconds = scalar_f64(pair.first()?)?;
    if !seconds.is_finite() {
        return None;
    }
    let value = scalar_f64(pair.get(1)?)?;
    Some(Point((seconds * 1_000.0).round() as i64, value))
}

fn scalar_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}
