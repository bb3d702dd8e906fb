use indexmap::IndexMap;
use serde::Serialize;

use crate::normalize::Series;

const NOT_AVAILABLE: &str = "N/A";

/// Summary shown next to a series name in the legend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LegendStat {
    pub mean: Option<f64>,
    pub max: Option<f64>,
    pub last: Option<f64>,
}

impl LegendStat {
    /// Stats over the finite values of an instant-sorted series.
    pub fn from_series(series: &Series) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut max = f64::NEG_INFINITY;

        for value in series.points.iter().map(|p| p.value()).filter(|v| v.is_finite()) {
            count += 1;
            sum += value;
            if value > max {
                max = value;
            }
        }

        if count == 0 {
            return Self::default();
        }

        let last = series
            .points
            .iter()
            .rev()
            .map(|p| p.value())
            .find(|v| v.is_finite());

        Self {
            mean: Some(sum / count as f64),
            max: Some(max),
            last,
        }
    }

    /// `name  [last=… max=… mean=…]`
    pub fn legend_label(&self, name: &str) -> String {
        format!(
            "{name}  [last={}  max={}  mean={}]",
            format_stat(self.last),
            format_stat(self.max),
            format_stat(self.mean)
        )
    }
}

/// Per-series stats keyed by series name, in series order.
pub fn compute(series: &[Series]) -> IndexMap<String, LegendStat> {
    series
        .iter()
        .map(|s| (s.name.clone(), LegendStat::from_series(s)))
        .collect()
}

/// Display precision shrinks as magnitude grows.
pub fn format_stat(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let magnitude = v.abs();
            if magnitude >= 1_000.0 {
                format!("{v:.0}")
            } else if magnitude >= 10.0 {
                format!("{v:.2}")
            } else {
                format!("{v:.3}")
            }
        }
        _ => NOT_AVAILABLE.to_string(),
    }
}
