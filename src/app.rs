use std::sync::Arc;

use crate::config::AppConfig;
use crate::dispatch::QuerySource;
use crate::metrics::AppMetrics;
use crate::session::{ChartSession, QuerySpec};
use crate::state::SessionRegistry;

/// Shared application context passed to HTTP handlers and sessions.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub source: Arc<dyn QuerySource>,
    pub metrics: AppMetrics,
    pub sessions: SessionRegistry,
}

impl AppContext {
    pub fn new(config: AppConfig, source: Arc<dyn QuerySource>, metrics: AppMetrics) -> Self {
        Self {
            config: Arc::new(config),
            source,
            metrics,
            sessions: SessionRegistry::new(),
        }
    }

    /// Create and register a session; any session with the same id is shut down.
    pub async fn open_session(&self, id: impl Into<String>, spec: QuerySpec) -> Arc<ChartSession> {
        let session = ChartSession::new(
            id,
            spec,
            Arc::clone(&self.source),
            self.config.normalize.clone(),
            self.metrics.clone(),
        );
        self.sessions.insert(Arc::clone(&session)).await;
        session
    }
}
