/// Execution REST API endpoints
///
/// Runs are synchronous: the request returns once the run reaches a
/// terminal state. A caller-supplied `run_id` lets another request cancel
/// the run while it is still in flight.

use crate::api::{api_error, bad_request, ApiError, ApiResult, AppState};
use crate::runtime::context::{RunOptions, RunReport};
use crate::workflow::types::DataMap;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub checkpoint_key: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Create execution routes
pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/execute", post(execute_workflow))
        .route("/api/workflows/{id}/executions", get(list_executions))
        .route("/api/executions/active", get(active_runs))
        .route("/api/executions/{run_id}", get(get_execution))
        .route("/api/executions/{run_id}/cancel", post(cancel_execution))
        .route("/api/executions/{run_id}/resume", post(resume_execution))
        .route("/api/executions/{run_id}/checkpoints", get(list_checkpoints))
}

fn run_options(timeout_ms: Option<u64>, run_id: Option<String>) -> RunOptions {
    let mut options = RunOptions::default();
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    if let Some(run_id) = run_id {
        options = options.with_run_id(run_id);
    }
    options
}

/// POST /api/workflows/{id}/execute
/// Body: { "input": { ... }, "timeout_ms": 5000, "run_id": "optional" }
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ExecuteRequest>,
) -> ApiResult<RunReport> {
    let input = match payload.input {
        None | Some(Value::Null) => DataMap::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(bad_request("input must be a JSON object")),
    };

    tracing::info!("🎯 Execution requested for workflow {}", id);
    let report = state
        .service
        .execute(&id, input, run_options(payload.timeout_ms, payload.run_id))
        .await
        .map_err(api_error)?;
    Ok(Json(report))
}

/// GET /api/workflows/{id}/executions
async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let executions = state.service.list_executions(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "executions": executions })))
}

/// GET /api/executions/active
async fn active_runs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "runs": state.service.active_runs().await }))
}

/// GET /api/executions/{run_id}
async fn get_execution(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<RunReport> {
    let report = state.service.get_execution(&run_id).await.map_err(api_error)?;
    Ok(Json(report))
}

/// POST /api/executions/{run_id}/cancel
async fn cancel_execution(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.service.cancel(&run_id).await {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("run '{}' is not active", run_id) })),
        ));
    }
    Ok(Json(json!({ "run_id": run_id, "cancelled": true })))
}

/// POST /api/executions/{run_id}/resume
/// Body: { "checkpoint_key": "...", "timeout_ms": 5000 }
async fn resume_execution(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<ResumeRequest>,
) -> ApiResult<RunReport> {
    tracing::info!("♻️ Resume requested for run {} at '{}'", run_id, payload.checkpoint_key);
    let report = state
        .service
        .resume(&run_id, &payload.checkpoint_key, run_options(payload.timeout_ms, None))
        .await
        .map_err(api_error)?;
    Ok(Json(report))
}

/// GET /api/executions/{run_id}/checkpoints
async fn list_checkpoints(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Value> {
    let checkpoints = state.service.checkpoints(&run_id).await.map_err(api_error)?;
    Ok(Json(json!({ "checkpoints": checkpoints })))
}
