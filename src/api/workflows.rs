/// Workflow management REST API endpoints
///
/// CRUD on definitions plus fine-grained node and connection edits. Every
/// change is persisted and hot-swapped into the registry by the service.

use crate::api::{api_error, bad_request, ApiError, ApiResult, AppState};
use crate::workflow::{
    diagram::DiagramFormat,
    service::{NewWorkflow, WorkflowUpdate},
    types::{Connection, Node, WorkflowDefinition},
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct DiagramQuery {
    pub format: Option<String>,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/nodes", post(add_node))
        .route(
            "/api/workflows/{id}/nodes/{node_id}",
            put(update_node).delete(remove_node),
        )
        .route("/api/workflows/{id}/connections", post(add_connection))
        .route(
            "/api/workflows/{id}/connections/{connection_id}",
            delete(remove_connection),
        )
        .route("/api/workflows/{id}/publish", post(publish_workflow))
        .route("/api/workflows/{id}/archive", post(archive_workflow))
        .route("/api/workflows/{id}/diagram", get(render_diagram))
}

/// POST /api/workflows
/// Body: { "name": "...", "owner": "...", "nodes": [...], "connections": [...] }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<NewWorkflow>,
) -> Result<(StatusCode, Json<WorkflowDefinition>), ApiError> {
    let workflow = state.service.create_workflow(payload).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json((*workflow).clone())))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> ApiResult<Value> {
    let workflows = state.service.list_workflows().await.map_err(api_error)?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = state.service.get_workflow(&id).await.map_err(api_error)?;
    Ok(Json((*workflow).clone()))
}

/// PUT /api/workflows/{id}
/// Body: any of { "name", "description", "nodes", "connections" }
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<WorkflowUpdate>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = state.service.update_workflow(&id, payload).await.map_err(api_error)?;
    Ok(Json((*workflow).clone()))
}

/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.service.delete_workflow(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "message": format!("Workflow '{}' deleted successfully", id) })))
}

/// POST /api/workflows/{id}/nodes
async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(node): Json<Node>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = state.service.add_node(&id, node).await.map_err(api_error)?;
    Ok(Json((*workflow).clone()))
}

/// PUT /api/workflows/{id}/nodes/{node_id}
async fn update_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
    Json(node): Json<Node>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = state
        .service
        .update_node(&id, &node_id, node)
        .await
        .map_err(api_error)?;
    Ok(Json((*workflow).clone()))
}

/// DELETE /api/workflows/{id}/nodes/{node_id}
async fn remove_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = state.service.remove_node(&id, &node_id).await.map_err(api_error)?;
    Ok(Json((*workflow).clone()))
}

/// POST /api/workflows/{id}/connections
async fn add_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(connection): Json<Connection>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = state
        .service
        .add_connection(&id, connection)
        .await
        .map_err(api_error)?;
    Ok(Json((*workflow).clone()))
}

/// DELETE /api/workflows/{id}/connections/{connection_id}
async fn remove_connection(
    State(state): State<AppState>,
    Path((id, connection_id)): Path<(String, String)>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = state
        .service
        .remove_connection(&id, &connection_id)
        .await
        .map_err(api_error)?;
    Ok(Json((*workflow).clone()))
}

/// POST /api/workflows/{id}/publish
async fn publish_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = state.service.publish(&id).await.map_err(api_error)?;
    Ok(Json((*workflow).clone()))
}

/// POST /api/workflows/{id}/archive
async fn archive_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = state.service.archive(&id).await.map_err(api_error)?;
    Ok(Json((*workflow).clone()))
}

/// GET /api/workflows/{id}/diagram?format=mermaid|dot
async fn render_diagram(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DiagramQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let format = match query.format.as_deref() {
        Some(raw) => raw.parse::<DiagramFormat>().map_err(bad_request)?,
        None => DiagramFormat::default(),
    };
    let diagram = state.service.diagram(&id, format).await.map_err(api_error)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], diagram))
}
