use ai_playground::config::{Config, DatabaseConfig, EngineConfig, ServerConfig};
use ai_playground::server::create_app;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

async fn app(dir: &TempDir) -> Router {
    let config = Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        database: DatabaseConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
        },
        engine: EngineConfig {
            run_timeout_secs: 30,
            max_concurrency: 4,
        },
    };
    create_app(config).await.unwrap()
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn llm_workflow() -> Value {
    json!({
        "name": "Writer",
        "owner": "tester",
        "nodes": [
            { "id": "start", "name": "Start", "node_type": "Start",
              "output_ports": [{ "name": "out" }] },
            { "id": "llm", "name": "Writer", "node_type": "LLMAgent",
              "input_ports": [{ "name": "in" }], "output_ports": [{ "name": "out" }],
              "agent": { "name": "Writer", "provider": "ollama", "model": "llama3" } },
            { "id": "end", "name": "End", "node_type": "End",
              "input_ports": [{ "name": "in" }] }
        ],
        "connections": [
            { "source": "start", "target": "llm" },
            { "source": "llm", "target": "end" }
        ]
    })
}

#[tokio::test]
async fn test_health_check() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;
    let (status, body) = send(&app, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_create_and_execute_workflow() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, created) = send_json(&app, Method::POST, "/api/workflows", Some(llm_workflow())).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["version"], json!(1));

    let (status, report) = send_json(
        &app,
        Method::POST,
        &format!("/api/workflows/{}/execute", id),
        Some(json!({ "input": { "x": 1 }, "run_id": "api-run" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], json!("Completed"));
    assert_eq!(report["output"]["x"], json!(1));
    assert!(report["output"]["llm_response"].is_string());

    let (status, body) = send_json(
        &app,
        Method::POST,
        &format!("/api/workflows/{}/execute", id),
        Some(json!({ "input": { "x": 2 }, "run_id": "api-run" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("api-run"));

    let (status, stored) = send_json(&app, Method::GET, "/api/executions/api-run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["run_id"], json!("api-run"));

    let (status, runs) = send_json(
        &app,
        Method::GET,
        &format!("/api/workflows/{}/executions", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runs["executions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_execute_rejects_non_object_input() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;
    let (_, created) = send_json(&app, Method::POST, "/api/workflows", Some(llm_workflow())).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = send_json(
        &app,
        Method::POST,
        &format!("/api/workflows/{}/execute", id),
        Some(json!({ "input": [1, 2, 3] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_invalid_workflow_reports_engine_error() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;
    let (_, created) = send_json(
        &app,
        Method::POST,
        "/api/workflows",
        Some(json!({ "name": "Empty", "nodes": [], "connections": [] })),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = send_json(&app, Method::POST, &format!("/api/workflows/{}/execute", id), Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"]["kind"], json!("graph_structure"));
}

#[tokio::test]
async fn test_diagram_formats() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;
    let (_, created) = send_json(&app, Method::POST, "/api/workflows", Some(llm_workflow())).await;
    let id = created["id"].as_str().unwrap();

    let (status, mermaid) = send(&app, Method::GET, &format!("/api/workflows/{}/diagram", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(mermaid).unwrap().starts_with("graph TD"));

    let (status, dot) = send(
        &app,
        Method::GET,
        &format!("/api/workflows/{}/diagram?format=dot", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(dot).unwrap().starts_with("digraph"));

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/api/workflows/{}/diagram?format=svg", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_resources_return_404() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = send_json(&app, Method::GET, "/api/workflows/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(&app, Method::GET, "/api/executions/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(&app, Method::POST, "/api/executions/nope/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, active) = send_json(&app, Method::GET, "/api/executions/active", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["runs"], json!([]));
}

#[tokio::test]
async fn test_node_edits_over_http() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;
    let (_, created) = send_json(&app, Method::POST, "/api/workflows", Some(llm_workflow())).await;
    let id = created["id"].as_str().unwrap();

    let (status, updated) = send_json(
        &app,
        Method::DELETE,
        &format!("/api/workflows/{}/nodes/llm", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(updated["connections"], json!([]));
    assert_eq!(updated["version"], json!(2));

    let (status, _) = send_json(
        &app,
        Method::POST,
        &format!("/api/workflows/{}/connections", id),
        Some(json!({ "source": "start", "target": "ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, Method::POST, &format!("/api/workflows/{}/archive", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(
        &app,
        Method::POST,
        &format!("/api/workflows/{}/execute", id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
