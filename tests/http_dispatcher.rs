use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use seriesdash::config::AppConfig;
use seriesdash::dispatch::HttpDispatcher;
use seriesdash::{Backend, DispatchRequest, QueryError, QuerySource, RawQueryResult, TimeWindow};

/// What the stand-in proxy received.
#[derive(Clone, Default)]
struct Received {
    params: Arc<Mutex<Vec<HashMap<String, String>>>>,
    sql: Arc<Mutex<Vec<String>>>,
}

async fn query_range(
    State(received): State<Received>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    received.params.lock().push(params);
    Json(json!({
        "status": "success",
        "data": {"resultType": "matrix", "result": [
            {"metric": {"__name__": "up", "job": "x"}, "values": [[1, "1"], [2, "0"]]}
        ]}
    }))
}

async fn clickhouse_query(State(received): State<Received>, Json(body): Json<Value>) -> Response {
    let sql = body["sql"].as_str().unwrap_or_default().to_string();
    received.sql.lock().push(sql.clone());

    if sql.contains("broken") {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Query failed", "details": "Syntax error"})),
        )
            .into_response()
    } else if sql.contains("garbled") {
        (StatusCode::OK, "this is not json").into_response()
    } else {
        Json(json!({"data": [{"t": 1000, "value": 2}, 7]})).into_response()
    }
}

async fn start_proxy() -> (SocketAddr, Received) {
    let received = Received::default();
    let router = Router::new()
        .route("/api/prometheus/query_range", get(query_range))
        .route("/api/clickhouse/query", post(clickhouse_query))
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub proxy");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (addr, received)
}

fn dispatcher_for(base: &str) -> HttpDispatcher {
    let mut config = AppConfig::default();
    config.backends.prometheus_url = Some(format!("{base}/"));
    config.backends.clickhouse_url = Some(base.to_string());
    HttpDispatcher::from_config(&config).expect("dispatcher")
}

fn request(backend: Backend, query: &str, step_seconds: Option<u64>) -> DispatchRequest {
    DispatchRequest {
        backend,
        query: query.to_string(),
        window: TimeWindow {
            start: 1_999,
            end: 60_500,
        },
        step_seconds,
    }
}

#[tokio::test]
async fn range_query_sends_seconds_and_step() {
    let (addr, received) = start_proxy().await;
    let dispatcher = dispatcher_for(&format!("http://{addr}"));

    let result = dispatcher
        .dispatch(request(Backend::Prometheus, "up", Some(0)))
        .await
        .expect("range query");
    let series = match result {
        RawQueryResult::LabelVector(series) => series,
        other => panic!("expected label vector, got {other:?}"),
    };
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].samples.len(), 2);

    dispatcher
        .dispatch(request(Backend::Prometheus, "up", None))
        .await
        .expect("default step");

    let params = received.params.lock();
    assert_eq!(params[0]["query"], "up");
    assert_eq!(params[0]["start"], "1");
    assert_eq!(params[0]["end"], "60");
    assert_eq!(params[0]["step"], "1");
    assert_eq!(params[1]["step"], "15");
}

#[tokio::test]
async fn sql_query_binds_window_and_requests_json() {
    let (addr, received) = start_proxy().await;
    let dispatcher = dispatcher_for(&format!("http://{addr}"));

    let result = dispatcher
        .dispatch(request(Backend::ClickHouse, "select {{start}},{{end}}", None))
        .await
        .expect("sql query");
    let rows = match result {
        RawQueryResult::Tabular(rows) => rows,
        other => panic!("expected rows, got {other:?}"),
    };
    assert_eq!(rows.len(), 1);

    dispatcher
        .dispatch(request(Backend::ClickHouse, "SELECT 1 Format JSON", None))
        .await
        .expect("explicit format");

    let sql = received.sql.lock();
    assert_eq!(sql[0], "select 1999,60500\nFORMAT JSON");
    assert_eq!(sql[1], "SELECT 1 Format JSON");
}

#[tokio::test]
async fn rejected_query_carries_status_and_message() {
    let (addr, _) = start_proxy().await;
    let dispatcher = dispatcher_for(&format!("http://{addr}"));

    let err = dispatcher
        .dispatch(request(Backend::ClickHouse, "select broken", None))
        .await
        .expect_err("rejected");
    assert_eq!(
        err,
        QueryError::BackendRequest {
            status: 400,
            message: "Query failed: Syntax error".into(),
        }
    );
}

#[tokio::test]
async fn undecodable_success_body_is_backend_request() {
    let (addr, _) = start_proxy().await;
    let dispatcher = dispatcher_for(&format!("http://{addr}"));

    let err = dispatcher
        .dispatch(request(Backend::ClickHouse, "select garbled", None))
        .await
        .expect_err("undecodable");
    match err {
        QueryError::BackendRequest { status, message } => {
            assert_eq!(status, 200);
            assert!(message.starts_with("unexpected response body"), "{message}");
        }
        other => panic!("expected backend request error, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_port_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let dispatcher = dispatcher_for(&format!("http://{addr}"));
    for backend in [Backend::Prometheus, Backend::ClickHouse] {
        let err = dispatcher
            .dispatch(request(backend, "up", None))
            .await
            .expect_err("refused");
        assert!(matches!(err, QueryError::Network(_)), "{backend}: {err:?}");
        assert_eq!(err.kind(), "network");
    }
}
