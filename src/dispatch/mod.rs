use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use crate::config::AppConfig;
use crate::error::QueryError;
use crate::normalize::RawQueryResult;
use crate::window::TimeWindow;

pub mod wire;

const PROMETHEUS_RANGE_PATH: &str = "/api/prometheus/query_range";
const CLICKHOUSE_QUERY_PATH: &str = "/api/clickhouse/query";

/// Which engine a query is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Label-vector metrics engine.
    Prometheus,
    /// Columnar SQL engine.
    #[serde(alias = "click_house")]
    ClickHouse,
}

impl Backend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Backend::Prometheus => "prometheus",
            Backend::ClickHouse => "clickhouse",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub backend: Backend,
    pub query: String,
    pub window: TimeWindow,
    pub step_seconds: Option<u64>,
}

pub type DispatchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RawQueryResult, QueryError>> + Send + 'a>>;

/// Anything that can turn a request into a backend-shaped result.
pub trait QuerySource: Send + Sync {
    fn dispatch(&self, request: DispatchRequest) -> DispatchFuture<'_>;
}

/// Talks to the forwarding proxy over HTTP. Holds no backend credentials.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    prometheus_url: Option<String>,
    clickhouse_url: Option<String>,
    label_vector_timeout: Duration,
    tabular_timeout: Duration,
}

impl HttpDispatcher {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            prometheus_url: normalize_base(config.backends.prometheus_url.as_deref()),
            clickhouse_url: normalize_base(config.backends.clickhouse_url.as_deref()),
            label_vector_timeout: config.timeouts.label_vector,
            tabular_timeout: config.timeouts.tabular,
        })
    }

    #[instrument(skip_all, fields(backend = "prometheus"))]
    async fn query_range(&self, request: DispatchRequest) -> Result<RawQueryResult, QueryError> {
        let base = self.prometheus_url.as_deref().ok_or_else(|| {
            QueryError::BackendUnavailable("prometheus proxy URL is not configured".into())
        })?;
        let url = format!("{base}{PROMETHEUS_RANGE_PATH}");
        let step = wire::effective_step(request.step_seconds);
        let params = [
            ("query", request.query),
            ("start", request.window.start_seconds().to_string()),
            ("end", request.window.end_seconds().to_string()),
            ("step", step.to_string()),
        ];
        debug!(%url, step, "dispatching range query");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .timeout(self.label_vector_timeout)
            .send()
            .await?;
        let (status, body) = read_success(response).await?;

        wire::decode_label_vector(&body)
            .map(RawQueryResult::LabelVector)
            .map_err(|err| QueryError::BackendRequest {
                status,
                message: format!("unexpected response body: {err}"),
            })
    }

    #[instrument(skip_all, fields(backend = "clickhouse"))]
    async fn query_rows(&self, request: DispatchRequest) -> Result<RawQueryResult, QueryError> {
        let base = self.clickhouse_url.as_deref().ok_or_else(|| {
            QueryError::BackendUnavailable("clickhouse proxy URL is not configured".into())
        })?;
        let url = format!("{base}{CLICKHOUSE_QUERY_PATH}");
        let bound = wire::bind_time_placeholders(&request.query, &request.window);
        let sql = wire::ensure_json_format(&bound);
        debug!(%url, bytes = sql.len(), "dispatching sql query");

        let response = self
            .client
            .post(&url)
            .json(&json!({ "sql": sql }))
            .timeout(self.tabular_timeout)
            .send()
            .await?;
        let (status, body) = read_success(response).await?;

        wire::decode_tabular(&body)
            .map(RawQueryResult::Tabular)
            .map_err(|err| QueryError::BackendRequest {
                status,
                message: format!("unexpected response body: {err}"),
            })
    }
}

impl QuerySource for HttpDispatcher {
    fn dispatch(&self, request: DispatchRequest) -> DispatchFuture<'_> {
        Box::pin(async move {
            match request.backend {
                Backend::Prometheus => self.query_range(request).await,
                Backend::ClickHouse => self.query_rows(request).await,
            }
        })
    }
}

async fn read_success(response: reqwest::Response) -> Result<(u16, Vec<u8>), QueryError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(QueryError::BackendRequest {
            status: status.as_u16(),
            message: wire::error_message(&text),
        });
    }
    let body = response.bytes().await?;
    Ok((status.as_u16(), body.to_vec()))
}

fn normalize_base(url: Option<&str>) -> Option<String> {
    url.map(str::trim)
        .filter(|url| !url.is_empty())
        .map(|url| url.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(prometheus: Option<&str>, clickhouse: Option<&str>) -> HttpDispatcher {
        let mut config = AppConfig::default();
        config.backends.prometheus_url = prometheus.map(str::to_string);
        config.backends.clickhouse_url = clickhouse.map(str::to_string);
        HttpDispatcher::from_config(&config).expect("dispatcher")
    }

    fn request(backend: Backend) -> DispatchRequest {
        DispatchRequest {
            backend,
            query: "up".into(),
            window: TimeWindow { start: 0, end: 1 },
            step_seconds: None,
        }
    }

    #[tokio::test]
    async fn missing_proxy_url_is_backend_unavailable() {
        let dispatcher = dispatcher(None, Some("   "));
        for backend in [Backend::Prometheus, Backend::ClickHouse] {
            let err = dispatcher.dispatch(request(backend)).await.expect_err("unavailable");
            assert!(matches!(err, QueryError::BackendUnavailable(_)), "{backend}: {err:?}");
        }
    }

    #[test]
    fn base_url_is_trimmed() {
        assert_eq!(
            normalize_base(Some(" http://proxy:3000/ ")),
            Some("http://proxy:3000".to_string())
        );
        assert_eq!(normalize_base(Some("")), None);
    }

    #[test]
    fn backend_names_round_trip_through_serde() {
        let parsed: Backend = serde_json::from_str("\"clickhouse\"").expect("backend");
        assert_eq!(parsed, Backend::ClickHouse);
        assert_eq!(
            serde_json::to_string(&Backend::Prometheus).expect("encode"),
            "\"prometheus\""
        );
    }
}
