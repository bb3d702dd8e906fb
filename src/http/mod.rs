use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::AppContext;
use crate::scheduler::SchedulerState;
use crate::session::{ChartSession, QueryForm, QuerySpec, RefreshConfig, SessionRequest};
use crate::state::ChartFrame;

pub fn create_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/:id", axum::routing::delete(delete_session))
        .route("/sessions/:id/chart", get(get_chart))
        .route("/sessions/:id/query", put(put_query))
        .route("/sessions/:id/refresh", put(put_refresh))
        .route("/sessions/:id/run", post(run_session));

    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(id) => (StatusCode::NOT_FOUND, format!("session {id} not found")),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Serialize)]
struct SessionSummary {
    id: String,
    spec: QuerySpec,
    refresh: SchedulerState,
    generation: u64,
}

impl SessionSummary {
    fn of(session: &ChartSession) -> Self {
        Self {
            id: session.id().to_string(),
            spec: session.spec(),
            refresh: session.refresh_state(),
            generation: session.latest_generation(),
        }
    }
}

#[derive(Serialize)]
struct SessionView {
    #[serde(flatten)]
    summary: SessionSummary,
    frame: ChartFrame,
}

async fn get_healthz() -> StatusCode {
    StatusCode::OK
}

async fn get_metrics(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn list_sessions(State(ctx): State<AppContext>) -> Json<Vec<SessionSummary>> {
    let sessions = ctx.sessions.list().await;
    Json(sessions.iter().map(|s| SessionSummary::of(s)).collect())
}

/// Open a session, run it once, then arm its refresh.
async fn create_session(
    State(ctx): State<AppContext>,
    Json(request): Json<SessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let refresh = RefreshConfig {
        interval_seconds: request.refresh_seconds,
    };
    refresh.validate().map_err(ApiError::BadRequest)?;

    let id = uuid::Uuid::new_v4().to_string();
    let session = ctx.open_session(id.clone(), request.query.to_spec()).await;
    info!(session = %id, backend = %request.query.backend, "session opened");

    session.run_once().await;
    session.configure_refresh(refresh.interval_seconds);

    Ok((
        StatusCode::CREATED,
        Json(SessionView {
            summary: SessionSummary::of(&session),
            frame: session.snapshot().await,
        }),
    ))
}

async fn delete_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.sessions
        .remove(&id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(ApiError::NotFound(id))
}

async fn get_chart(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<ChartFrame>, ApiError> {
    let session = find(&ctx, id).await?;
    Ok(Json(session.snapshot().await))
}

async fn put_query(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(form): Json<QueryForm>,
) -> Result<Json<SessionSummary>, ApiError> {
    let session = find(&ctx, id).await?;
    session.update_spec(form.to_spec());
    Ok(Json(SessionSummary::of(&session)))
}

async fn put_refresh(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(refresh): Json<RefreshConfig>,
) -> Result<Json<SchedulerState>, ApiError> {
    refresh.validate().map_err(ApiError::BadRequest)?;
    let session = find(&ctx, id).await?;
    Ok(Json(session.configure_refresh(refresh.interval_seconds)))
}

/// Run now and re-arm the current refresh interval.
async fn run_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = find(&ctx, id).await?;
    session.run_once().await;
    if let SchedulerState::Active { interval_seconds } = session.refresh_state() {
        session.configure_refresh(interval_seconds);
    }

    Ok(Json(SessionView {
        summary: SessionSummary::of(&session),
        frame: session.snapshot().await,
    }))
}

async fn find(ctx: &AppContext, id: String) -> Result<std::sync::Arc<ChartSession>, ApiError> {
    ctx.sessions.get(&id).await.ok_or(ApiError::NotFound(id))
}
