use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use shared::error::{GatewayError, StoreError, SyncError};
use shared::repositories::StrategyStore;
use shared::services::Reconciled;
use shared::StrategyRecord;

use crate::state::AppState;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::MissingCredential { .. } => StatusCode::UNAUTHORIZED,
            SyncError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            SyncError::Gateway(GatewayError::Unavailable { .. })
            | SyncError::Gateway(GatewayError::Transport(_)) => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Gateway(_) => StatusCode::BAD_GATEWAY,
            SyncError::LocalPersistence { .. }
            | SyncError::Store(_)
            | SyncError::InvalidDefinition(_)
            | SyncError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Workflow request failed: {}", err);
        }
        ApiError::new(status, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        SyncError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// The caller's API token, forwarded to the engine as the workflow credential.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn load_strategy(state: &AppState, id: u64) -> Result<StrategyRecord, ApiError> {
    state
        .service
        .store()
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("strategy {} not found", id)))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn version() -> Json<Value> {
    let build_time_raw = option_env!("BUILD_TIME").unwrap_or("unknown");
    let build_time = build_time_raw
        .parse::<i64>()
        .ok()
        .and_then(|epoch| chrono::DateTime::from_timestamp(epoch, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| build_time_raw.to_string());

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "branch": option_env!("GIT_BRANCH").unwrap_or("unknown"),
        "tag": option_env!("GIT_TAG").unwrap_or("unknown"),
        "commit": option_env!("GIT_HASH").unwrap_or("unknown"),
        "build_time": build_time,
        "os": option_env!("BUILD_TARGET_OS").unwrap_or("unknown"),
    }))
}

pub async fn sync_workflow(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> ApiResult<Reconciled> {
    let record = load_strategy(&state, id).await?;
    let reconciled = state
        .service
        .reconcile(&record, bearer_token(&headers))
        .await?;
    Ok(Json(reconciled))
}

pub async fn rebuild_workflow(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing bearer token"))?;
    let record = load_strategy(&state, id).await?;
    let deployed = state.service.rebuild_from_template(&record, token).await?;

    Ok(Json(json!({
        "remote_id": deployed.remote_id,
        "active": deployed.active,
        "name": deployed.definition.name,
        "nodes": deployed.definition.nodes.len(),
    })))
}

pub async fn activate_workflow(
    state: State<AppState>,
    path: Path<u64>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    set_enabled(state, path, headers, true).await
}

pub async fn deactivate_workflow(
    state: State<AppState>,
    path: Path<u64>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    set_enabled(state, path, headers, false).await
}

async fn set_enabled(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    enabled: bool,
) -> ApiResult<Value> {
    let record = load_strategy(&state, id).await?;
    let remote_id = state
        .service
        .set_execution_enabled(&record, enabled, bearer_token(&headers))
        .await?;
    Ok(Json(json!({ "remote_id": remote_id, "active": enabled })))
}

pub async fn workflow_diff(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Value> {
    let record = load_strategy(&state, id).await?;
    let body = match state.service.explain_drift(&record).await? {
        Some(differences) => json!({
            "deployed": true,
            "in_sync": differences.is_empty(),
            "differences": differences,
        }),
        None => json!({ "deployed": false, "in_sync": false, "differences": [] }),
    };
    Ok(Json(body))
}

pub async fn sync_all(State(state): State<AppState>) -> ApiResult<shared::SyncReport> {
    Ok(Json(state.service.sync_all().await?))
}
