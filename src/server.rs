use std::future::Future;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::error::{QueryError, RefreshError};
use crate::models::{QueryRequest, QueryResponse, RefreshReport, Snapshot};
use crate::state::AppState;

/// Error body returned by every route: `{"error": "..."}`. Never carries
/// snapshot content.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let status = match &err {
            QueryError::EmptyQuery => StatusCode::BAD_REQUEST,
            QueryError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::Answer(_) => StatusCode::BAD_GATEWAY,
            QueryError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { status, message: err.to_string() }
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        let status = match &err {
            RefreshError::InProgress => StatusCode::CONFLICT,
            RefreshError::TimedOut(_) | RefreshError::ClusterUnreachable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { status, message: err.to_string() }
    }
}

#[derive(Serialize)]
struct RefreshResponse {
    status: &'static str,
    #[serde(flatten)]
    report: RefreshReport,
}

/// Env values are replaced by this in `GET /snapshot`; they may hold decoded secrets.
pub const REDACTED: &str = "[redacted]";

/// CORS for the listed origins only. `None` (no CORS headers at all) when the
/// list is empty or nothing in it parses.
pub fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {:?}: {}", origin, e);
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let mut router = Router::new()
        .route("/refresh", post(refresh_data))
        .route("/query", post(create_query))
        .route("/snapshot", get(current_snapshot))
        .route("/health", get(health));
    if let Some(cors) = cors_layer(allowed_origins) {
        router = router.layer(cors);
    }
    router.with_state(state)
}

async fn refresh_data(State(state): State<AppState>) -> Result<Json<RefreshResponse>, ApiError> {
    match state.refresher.refresh().await {
        Ok(report) => Ok(Json(RefreshResponse { status: "success", report })),
        Err(e) => {
            error!("Refresh error: {}", e);
            Err(e.into())
        }
    }
}

async fn create_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        warn!("Rejected query body: {}", rejection.body_text());
        ApiError { status: StatusCode::BAD_REQUEST, message: rejection.body_text() }
    })?;

    let query = request.query.unwrap_or_default();
    match state.answer(&query).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("Query error: {}", e);
            Err(e.into())
        }
    }
}

async fn current_snapshot(State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = state.store.current()?;
    Ok(Json(redact_env(&snapshot)))
}

fn redact_env(snapshot: &Snapshot) -> Snapshot {
    let mut redacted = snapshot.clone();
    let containers = redacted
        .pods
        .iter_mut()
        .flat_map(|p| p.containers.iter_mut())
        .chain(redacted.pod_details.values_mut());
    for container in containers {
        container.env.values_mut().for_each(|v| *v = REDACTED.to_string());
    }
    redacted.env_vars.values_mut().for_each(|v| *v = REDACTED.to_string());
    redacted
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "initialized": state.store.is_initialized(),
    }))
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    allowed_origins: &[String],
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }
    axum::serve(listener, router(state, allowed_origins))
        .with_graceful_shutdown(shutdown)
        .await
}
