use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::QueryError;
use crate::normalize::Series;
use crate::session::ChartSession;
use crate::stats::{self, LegendStat};
use crate::window::TimeWindow;

/// Everything the renderer needs for one chart, replaced wholesale per run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartFrame {
    pub generation: u64,
    pub title: String,
    pub series: Vec<Series>,
    pub legend: IndexMap<String, LegendStat>,
    pub legend_labels: Vec<String>,
    pub window: Option<TimeWindow>,
    pub error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub rendered_at: Option<DateTime<Utc>>,
}

impl ChartFrame {
    pub fn rendered(
        generation: u64,
        title: impl Into<String>,
        series: Vec<Series>,
        window: TimeWindow,
    ) -> Self {
        let legend = stats::compute(&series);
        let legend_labels = legend
            .iter()
            .map(|(name, stat)| stat.legend_label(name))
            .collect();

        Self {
            generation,
            title: title.into(),
            series,
            legend,
            legend_labels,
            window: Some(window),
            error: None,
            rendered_at: Some(Utc::now()),
        }
    }

    /// Empty chart with the failure as its title; legend cleared.
    pub fn failed(generation: u64, error: &QueryError) -> Self {
        let message = error.to_string();
        Self {
            generation,
            title: format!("Error: {message}"),
            error: Some(message),
            rendered_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Default)]
struct ChartStateInner {
    frame: RwLock<ChartFrame>,
    issued: AtomicU64,
}

/// Latest published frame plus the generation counter for one session.
#[derive(Clone, Default)]
pub struct ChartState {
    inner: Arc<ChartStateInner>,
}

impl ChartState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next generation number for a starting run.
    pub fn begin_run(&self) -> u64 {
        self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_issued(&self) -> u64 {
        self.inner.issued.load(Ordering::SeqCst)
    }

    /// Replace the frame if it belongs to the latest issued generation.
    ///
    /// Returns `false` when a newer run has started since, in which case the
    /// frame is dropped.
    pub async fn publish(&self, frame: ChartFrame) -> bool {
        let mut guard = self.inner.frame.write().await;
        if frame.generation != self.latest_issued() {
            return false;
        }
        *guard = frame;
        true
    }

    pub async fn snapshot(&self) -> ChartFrame {
        self.inner.frame.read().await.clone()
    }
}

/// Live chart sessions keyed by id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<ChartSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<ChartSession>) {
        let mut guard = self.sessions.write().await;
        if let Some(previous) = guard.insert(session.id().to_string(), session) {
            previous.shutdown();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ChartSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<ChartSession>> {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = &removed {
            session.shutdown();
        }
        removed
    }

    pub async fn list(&self) -> Vec<Arc<ChartSession>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    /// Cancel every recurrence; used on process shutdown.
    pub async fn shutdown_all(&self) {
        for session in self.sessions.read().await.values() {
            session.shutdown();
        }
    }
}
