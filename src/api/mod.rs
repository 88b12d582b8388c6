/// HTTP API Layer
///
/// REST endpoints for workflow editing, diagram rendering and execution.
/// Handlers stay thin: they translate HTTP to [`WorkflowService`] calls and
/// service errors to status codes.

// Workflow, node and connection management endpoints
pub mod workflows;

// Execution, resume and cancellation endpoints
pub mod executions;

use crate::workflow::service::{ServiceError, WorkflowService};
use axum::{http::StatusCode, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

pub use executions::create_execution_routes;
pub use workflows::create_workflow_routes;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
}

/// Error response: status code plus a JSON body
pub type ApiError = (StatusCode, Json<Value>);

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Map a service failure to a status code and error body
pub fn api_error(err: ServiceError) -> ApiError {
    let status = match &err {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Conflict(_) | ServiceError::Archived(_) => StatusCode::CONFLICT,
        ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
        ServiceError::Engine(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::Storage(e) => {
            tracing::error!("❌ Storage failure: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let body = match &err {
        ServiceError::Engine(engine) => json!({ "error": err.to_string(), "details": engine }),
        ServiceError::Storage(_) => json!({ "error": "internal storage error" }),
        _ => json!({ "error": err.to_string() }),
    };
    (status, Json(body))
}

pub(crate) fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() })))
}
