use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::dispatch::Backend;

/// Metrics registry for the service, scraped at `/metrics`.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    pipeline: PipelineMetrics,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("seriesdash".into()), None)?);
        let pipeline = PipelineMetrics::register(&registry)?;
        Ok(Self { registry, pipeline })
    }

    /// Observe one pipeline run; `outcome` is `ok` or an error kind.
    pub fn observe_run(&self, backend: Backend, duration: Duration, outcome: &str) {
        self.pipeline
            .duration
            .with_label_values(&[backend.as_str()])
            .observe(duration.as_secs_f64());
        self.pipeline
            .runs_total
            .with_label_values(&[backend.as_str(), outcome])
            .inc();
    }

    pub fn inc_stale(&self) {
        self.pipeline.stale_total.inc();
    }

    pub fn set_series_published(&self, session: &str, count: usize) {
        self.pipeline
            .series_published
            .with_label_values(&[session])
            .set(count as i64);
    }

    pub fn forget_session(&self, session: &str) {
        let _ = self
            .pipeline
            .series_published
            .remove_label_values(&[session]);
    }

    /// Encode metrics into Prometheus exposition format.
    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct PipelineMetrics {
    duration: HistogramVec,
    runs_total: IntCounterVec,
    stale_total: IntCounter,
    series_published: IntGaugeVec,
}

impl PipelineMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "pipeline_duration_seconds",
                "Resolve, dispatch and normalize duration",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        let runs_total = IntCounterVec::new(
            Opts::new("pipeline_runs_total", "Pipeline runs by outcome"),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let stale_total = IntCounter::new(
            "stale_results_total",
            "Completed runs discarded because a newer run had started",
        )?;
        registry.register(Box::new(stale_total.clone()))?;

        let series_published = IntGaugeVec::new(
            Opts::new("series_published", "Series in the latest published frame"),
            &["session"],
        )?;
        registry.register(Box::new(series_published.clone()))?;

        Ok(Self {
            duration,
            runs_total,
            stale_total,
            series_published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_recorded_runs() {
        let metrics = AppMetrics::new().expect("metrics");
        metrics.observe_run(Backend::Prometheus, Duration::from_millis(20), "ok");
        metrics.inc_stale();
        metrics.set_series_published("default", 3);

        let body = metrics.encode().expect("encode");
        assert!(body.contains("seriesdash_pipeline_runs_total"));
        assert!(body.contains("outcome=\"ok\""));
        assert!(body.contains("seriesdash_stale_results_total 1"));
        assert!(body.contains("seriesdash_series_published{session=\"default\"} 3"));
    }
}
