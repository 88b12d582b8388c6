use ai_playground::config::{Config, DatabaseConfig, EngineConfig, ServerConfig};
use ai_playground::error::EngineError;
use ai_playground::runtime::{NodeStatus, RunOptions, RunStatus};
use ai_playground::server::create_service;
use ai_playground::workflow::service::{NewWorkflow, ServiceError, WorkflowUpdate};
use ai_playground::workflow::{AgentDefinition, Connection, DataMap, Node, NodeType, WorkflowService, WorkflowStatus};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        database: DatabaseConfig {
            data_dir: dir.path().join("data").to_string_lossy().into_owned(),
        },
        engine: EngineConfig {
            run_timeout_secs: 30,
            max_concurrency: 4,
        },
    }
}

async fn open_service(dir: &TempDir) -> Arc<WorkflowService> {
    create_service(&config(dir)).await.unwrap()
}

fn named(name: &str) -> NewWorkflow {
    NewWorkflow {
        name: name.into(),
        owner: "tester".into(),
        ..Default::default()
    }
}

/// Start -> research (LLM) -> save (checkpoint) -> publish (tool) -> End
fn pipeline(tool_provider: &str) -> NewWorkflow {
    NewWorkflow {
        nodes: vec![
            Node::simple("start", "Start", NodeType::Start),
            Node::simple("research", "Research", NodeType::LlmAgent)
                .with_agent(AgentDefinition::new("Researcher", "ollama", "llama3")),
            Node::simple("save", "Save", NodeType::CheckpointAgent)
                .with_agent(AgentDefinition::new("Saver", "ollama", "llama3")),
            tool_node(tool_provider),
            Node::simple("end", "End", NodeType::End),
        ],
        connections: vec![
            Connection::data("start", "research"),
            Connection::data("research", "save"),
            Connection::data("save", "publish"),
            Connection::data("publish", "end"),
        ],
        ..named("pipeline")
    }
}

fn tool_node(provider: &str) -> Node {
    Node::simple("publish", "Publish", NodeType::ToolAgent)
        .with_agent(AgentDefinition::new("Publisher", provider, "none"))
}

#[tokio::test]
async fn test_edits_bump_version_and_persist() {
    let dir = TempDir::new().unwrap();
    let service = open_service(&dir).await;

    let created = service.create_workflow(named("editing")).await.unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(created.status, WorkflowStatus::Draft);
    let id = created.id.clone();

    service
        .add_node(&id, Node::simple("start", "Start", NodeType::Start))
        .await
        .unwrap();
    service
        .add_node(&id, Node::simple("end", "End", NodeType::End))
        .await
        .unwrap();
    let wired = service
        .add_connection(&id, Connection::data("start", "end"))
        .await
        .unwrap();
    assert_eq!(wired.version, 4);
    assert_eq!(wired.connections.len(), 1);

    let renamed = service
        .update_workflow(
            &id,
            WorkflowUpdate {
                name: Some("renamed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "renamed");
    assert_eq!(renamed.version, 5);
    // Older snapshots are untouched by later edits
    assert_eq!(wired.name, "editing");

    let listed = service.list_workflows().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].version, 5);

    // A fresh service over the same directory sees the persisted state
    let reopened = open_service(&dir).await;
    let loaded = reopened.get_workflow(&id).await.unwrap();
    assert_eq!(loaded.name, "renamed");
    assert_eq!(loaded.nodes.len(), 2);
}

#[tokio::test]
async fn test_removing_a_node_drops_its_connections() {
    let dir = TempDir::new().unwrap();
    let service = open_service(&dir).await;
    let wf = service.create_workflow(pipeline("ollama")).await.unwrap();

    let trimmed = service.remove_node(&wf.id, "save").await.unwrap();
    assert!(trimmed.node("save").is_none());
    assert_eq!(trimmed.connections.len(), 2);
    assert!(trimmed
        .connections
        .iter()
        .all(|c| c.source != "save" && c.target != "save"));

    let err = service.remove_node(&wf.id, "save").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_invalid_edits_are_rejected() {
    let dir = TempDir::new().unwrap();
    let service = open_service(&dir).await;
    let wf = service.create_workflow(pipeline("ollama")).await.unwrap();

    let err = service
        .add_node(&wf.id, Node::simple("start", "Another start", NodeType::Start))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    let err = service
        .add_connection(&wf.id, Connection::data("start", "ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Invalid(_)));

    let err = service.create_workflow(named("  ")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Invalid(_)));

    let unchanged = service.get_workflow(&wf.id).await.unwrap();
    assert_eq!(unchanged.version, 1);
}

#[tokio::test]
async fn test_publish_validates_the_graph() {
    let dir = TempDir::new().unwrap();
    let service = open_service(&dir).await;

    let broken = service
        .create_workflow(NewWorkflow {
            nodes: vec![Node::simple("writer", "Writer", NodeType::LlmAgent)],
            ..named("broken")
        })
        .await
        .unwrap();
    let err = service.publish(&broken.id).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Engine(EngineError::ValidationFailed { .. })
    ));
    assert_eq!(
        service.get_workflow(&broken.id).await.unwrap().status,
        WorkflowStatus::Draft
    );

    let good = service.create_workflow(pipeline("ollama")).await.unwrap();
    let published = service.publish(&good.id).await.unwrap();
    assert_eq!(published.status, WorkflowStatus::Published);
}

#[tokio::test]
async fn test_archived_workflows_are_frozen() {
    let dir = TempDir::new().unwrap();
    let service = open_service(&dir).await;
    let wf = service.create_workflow(pipeline("ollama")).await.unwrap();
    service.archive(&wf.id).await.unwrap();

    let err = service
        .execute(&wf.id, DataMap::new(), RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Archived(_)));

    let err = service
        .add_node(&wf.id, Node::simple("extra", "Extra", NodeType::Function))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Archived(_)));

    // Diagrams are still available for archived workflows
    let mermaid = service
        .diagram(&wf.id, Default::default())
        .await
        .unwrap();
    assert!(mermaid.starts_with("graph TD"));
}

#[tokio::test]
async fn test_execution_reports_are_persisted() {
    let dir = TempDir::new().unwrap();
    let service = open_service(&dir).await;
    let wf = service.create_workflow(pipeline("ollama")).await.unwrap();

    let mut input = DataMap::new();
    input.insert("topic".into(), json!("lifetimes"));
    let report = service
        .execute(&wf.id, input, RunOptions::default().with_run_id("run-1"))
        .await
        .unwrap();
    assert_eq!(report.run_id, "run-1");
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.output["topic"], json!("lifetimes"));

    let stored = service.get_execution("run-1").await.unwrap();
    assert_eq!(stored, report);

    let runs = service.list_executions(&wf.id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, "run-1");

    let checkpoints = service.checkpoints("run-1").await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].node_id, "save");

    let err = service.get_execution("missing").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    // A stored run id cannot be reused, and the stored report is untouched
    let err = service
        .execute(&wf.id, DataMap::new(), RunOptions::default().with_run_id("run-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(service.get_execution("run-1").await.unwrap(), report);

    let err = service
        .resume("run-1", "save", RunOptions::default().with_run_id("run-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn test_fix_and_resume_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let service = open_service(&dir).await;
    let wf = service.create_workflow(pipeline("flaky")).await.unwrap();

    let crashed = service
        .execute(&wf.id, DataMap::new(), RunOptions::default().with_run_id("crash"))
        .await
        .unwrap();
    assert_eq!(crashed.status, RunStatus::Failed);
    assert!(matches!(
        &crashed.error,
        Some(EngineError::NodeExecutionFailed { node_id, .. }) if node_id == "publish"
    ));

    service
        .update_node(&wf.id, "publish", tool_node("tool"))
        .await
        .unwrap();

    let resumed = service
        .resume("crash", "save", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.workflow_version, 2);
    assert!(!resumed.executed("research"));
    assert_eq!(resumed.entry("save").unwrap().status, NodeStatus::Restored);
    assert_eq!(resumed.entry("publish").unwrap().status, NodeStatus::Completed);
    assert!(resumed.output.contains_key("tool_response"));

    let err = service
        .resume("crash", "no-such-key", RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_cancel_unknown_run() {
    let dir = TempDir::new().unwrap();
    let service = open_service(&dir).await;
    assert!(!service.cancel("nope").await);
    assert!(service.active_runs().await.is_empty());
}
