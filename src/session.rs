use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::dispatch::{Backend, DispatchRequest, QuerySource};
use crate::error::QueryError;
use crate::metrics::AppMetrics;
use crate::normalize::{self, NormalizeOptions, Series};
use crate::scheduler::{self, RefreshScheduler, SchedulerState};
use crate::state::{ChartFrame, ChartState};
use crate::window::{TimeInstant, TimeWindow, WindowSpec};

const TABULAR_TITLE: &str = "ClickHouse";

/// What to run: backend, query text, window and sampling step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub backend: Backend,
    pub query: String,
    #[serde(default)]
    pub window: WindowSpec,
    #[serde(default)]
    pub step_seconds: Option<u64>,
}

impl QuerySpec {
    fn title(&self) -> String {
        match self.backend {
            Backend::Prometheus => self.query.trim().to_string(),
            Backend::ClickHouse => TABULAR_TITLE.to_string(),
        }
    }
}

/// Form-shaped query: range selector plus optional custom bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryForm {
    pub backend: Backend,
    pub query: String,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub step_seconds: Option<u64>,
}

impl QueryForm {
    pub fn to_spec(&self) -> QuerySpec {
        QuerySpec {
            backend: self.backend,
            query: self.query.clone(),
            window: WindowSpec::from_range(
                self.range.as_deref(),
                self.start.clone(),
                self.end.clone(),
            ),
            step_seconds: self.step_seconds,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionRequest {
    #[serde(flatten)]
    pub query: QueryForm,
    #[serde(default)]
    pub refresh_seconds: f64,
}

/// Polling interval; `0` disables refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub interval_seconds: f64,
}

impl RefreshConfig {
    pub fn validate(&self) -> Result<(), String> {
        scheduler::check_interval(self.interval_seconds)
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub generation: u64,
    pub published: bool,
    pub error: Option<QueryError>,
}

/// One chart: its query, its published frame and its refresh recurrence.
pub struct ChartSession {
    id: String,
    spec: RwLock<QuerySpec>,
    source: Arc<dyn QuerySource>,
    options: NormalizeOptions,
    metrics: AppMetrics,
    state: ChartState,
    scheduler: RefreshScheduler,
    closed: AtomicBool,
}

impl ChartSession {
    pub fn new(
        id: impl Into<String>,
        spec: QuerySpec,
        source: Arc<dyn QuerySource>,
        options: NormalizeOptions,
        metrics: AppMetrics,
    ) -> Arc<Self> {
        let id = id.into();
        Arc::new_cyclic(|weak: &Weak<ChartSession>| {
            let weak = weak.clone();
            let scheduler = RefreshScheduler::new(id.clone(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(session) = weak.upgrade() {
                        session.run_once().await;
                    }
                }
            });

            Self {
                id,
                spec: RwLock::new(spec),
                source,
                options,
                metrics,
                state: ChartState::new(),
                scheduler,
                closed: AtomicBool::new(false),
            }
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> QuerySpec {
        self.spec.read().clone()
    }

    /// Replace the query; takes effect on the next run.
    pub fn update_spec(&self, spec: QuerySpec) {
        *self.spec.write() = spec;
    }

    pub fn configure_refresh(&self, interval_seconds: f64) -> SchedulerState {
        self.scheduler.configure(interval_seconds)
    }

    pub fn refresh_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn pending_refreshes(&self) -> usize {
        self.scheduler.pending()
    }

    /// Stop refreshing and drop this session's metric series. Runs still in
    /// flight finish but no longer touch per-session metrics.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.scheduler.shutdown();
        self.metrics.forget_session(&self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> ChartFrame {
        self.state.snapshot().await
    }

    pub fn latest_generation(&self) -> u64 {
        self.state.latest_issued()
    }

    /// Run the pipeline once against the current time.
    ///
    /// Returns `None` when the query text is empty; nothing is dispatched and
    /// the published frame is left alone.
    pub async fn run_once(&self) -> Option<RunReport> {
        self.run_at(Utc::now().timestamp_millis()).await
    }

    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn run_at(&self, now: TimeInstant) -> Option<RunReport> {
        let spec = self.spec();
        if spec.query.trim().is_empty() {
            debug!("empty query; skipping run");
            return None;
        }

        let generation = self.state.begin_run();
        let started = Instant::now();
        let outcome = self.execute(&spec, now).await;
        let elapsed = started.elapsed();

        let (frame, error) = match outcome {
            Ok((series, window)) => {
                self.metrics.observe_run(spec.backend, elapsed, "ok");
                debug!(generation, series = series.len(), elapsed = ?elapsed, "pipeline run complete");
                (
                    ChartFrame::rendered(generation, spec.title(), series, window),
                    None,
                )
            }
            Err(err) => {
                self.metrics.observe_run(spec.backend, elapsed, err.kind());
                warn!(generation, backend = %spec.backend, error = %err, "pipeline run failed");
                (ChartFrame::failed(generation, &err), Some(err))
            }
        };

        let series_count = frame.series.len();
        let published = self.state.publish(frame).await;
        if published {
            if !self.is_closed() {
                self.metrics.set_series_published(&self.id, series_count);
            }
        } else {
            self.metrics.inc_stale();
            info!(generation, latest = self.state.latest_issued(), "discarded stale result");
        }

        Some(RunReport {
            generation,
            published,
            error,
        })
    }

    async fn execute(
        &self,
        spec: &QuerySpec,
        now: TimeInstant,
    ) -> Result<(Vec<Series>, TimeWindow), QueryError> {
        let window = spec.window.resolve_at(now)?;
        let raw = self
            .source
            .dispatch(DispatchRequest {
                backend: spec.backend,
                query: spec.query.trim().to_string(),
                window,
                step_seconds: spec.step_seconds,
            })
            .await?;
        Ok((normalize::normalize(&raw, &self.options), window))
    }
}
