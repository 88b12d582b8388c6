/// Workflow management service
///
/// Ties storage, the snapshot registry and the orchestrator together. Every
/// edit produces a new immutable snapshot; executions always run against the
/// snapshot current at the time they start.

use crate::error::EngineError;
use crate::runtime::checkpoint::{CheckpointSnapshot, CheckpointStore};
use crate::runtime::context::{RunOptions, RunReport};
use crate::runtime::engine::{ActiveRun, ExecutionOrchestrator};
use crate::workflow::diagram::{self, DiagramFormat};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::storage::{ExecutionMetadata, WorkflowMetadata, WorkflowStorage};
use crate::workflow::types::{
    Connection, DataMap, Node, WorkflowDefinition, WorkflowStatus,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Service-level failures, mapped to HTTP status codes by the API layer
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("workflow '{0}' is archived")]
    Archived(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Engine(EngineError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<EngineError> for ServiceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::DuplicateRun { .. } => ServiceError::Conflict(err.to_string()),
            other => ServiceError::Engine(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Fields accepted when creating a workflow
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Partial update of workflow metadata and graph
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub nodes: Option<Vec<Node>>,
    pub connections: Option<Vec<Connection>>,
}

pub struct WorkflowService {
    storage: WorkflowStorage,
    registry: Arc<WorkflowRegistry>,
    orchestrator: Arc<ExecutionOrchestrator>,
    checkpoints: Arc<dyn CheckpointStore>,
    /// Serializes read-modify-write cycles on definitions
    writes: Mutex<()>,
}

impl WorkflowService {
    pub fn new(
        storage: WorkflowStorage,
        registry: Arc<WorkflowRegistry>,
        orchestrator: Arc<ExecutionOrchestrator>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            storage,
            registry,
            orchestrator,
            checkpoints,
            writes: Mutex::new(()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<ExecutionOrchestrator> {
        &self.orchestrator
    }

    pub async fn create_workflow(&self, request: NewWorkflow) -> ServiceResult<Arc<WorkflowDefinition>> {
        if request.name.trim().is_empty() {
            return Err(ServiceError::Invalid("workflow name must not be empty".into()));
        }

        let mut workflow = WorkflowDefinition::new(request.name, request.owner)
            .with_description(request.description);
        workflow.nodes = request.nodes;
        workflow.connections = request.connections;
        check_unique_ids(&workflow)?;

        self.storage.save_workflow(&workflow).await?;
        let snapshot = self.registry.publish(workflow);
        tracing::info!("🔥 Created workflow: {} ({})", snapshot.id, snapshot.name);
        Ok(snapshot)
    }

    pub async fn list_workflows(&self) -> ServiceResult<Vec<WorkflowMetadata>> {
        Ok(self.storage.list_workflows().await?)
    }

    /// Current snapshot, from the registry or (on a miss) from storage
    pub async fn get_workflow(&self, id: &str) -> ServiceResult<Arc<WorkflowDefinition>> {
        if let Some(snapshot) = self.registry.get(id) {
            return Ok(snapshot);
        }
        match self.storage.get_workflow(id).await? {
            Some(workflow) => Ok(self.registry.publish(workflow)),
            None => Err(ServiceError::NotFound(format!("workflow '{}'", id))),
        }
    }

    pub async fn update_workflow(&self, id: &str, update: WorkflowUpdate) -> ServiceResult<Arc<WorkflowDefinition>> {
        self.mutate(id, |wf| {
            if let Some(name) = update.name {
                if name.trim().is_empty() {
                    return Err(ServiceError::Invalid("workflow name must not be empty".into()));
                }
                wf.name = name;
            }
            if let Some(description) = update.description {
                wf.description = description;
            }
            if let Some(nodes) = update.nodes {
                wf.nodes = nodes;
            }
            if let Some(connections) = update.connections {
                wf.connections = connections;
            }
            check_unique_ids(wf)
        })
        .await
    }

    pub async fn delete_workflow(&self, id: &str) -> ServiceResult<()> {
        let _guard = self.writes.lock().await;
        let removed = self.storage.delete_workflow(id).await?;
        self.registry.remove(id);
        if !removed {
            return Err(ServiceError::NotFound(format!("workflow '{}'", id)));
        }
        tracing::info!("🗑️ Deleted workflow: {}", id);
        Ok(())
    }

    pub async fn add_node(&self, id: &str, node: Node) -> ServiceResult<Arc<WorkflowDefinition>> {
        self.mutate(id, |wf| {
            if wf.node(&node.id).is_some() {
                return Err(ServiceError::Conflict(format!("node '{}' already exists", node.id)));
            }
            wf.nodes.push(node);
            Ok(())
        })
        .await
    }

    /// Replace a node definition, keeping its id
    pub async fn update_node(&self, id: &str, node_id: &str, mut node: Node) -> ServiceResult<Arc<WorkflowDefinition>> {
        self.mutate(id, |wf| {
            let slot = wf
                .node_mut(node_id)
                .ok_or_else(|| ServiceError::NotFound(format!("node '{}'", node_id)))?;
            node.id = node_id.to_string();
            *slot = node;
            Ok(())
        })
        .await
    }

    /// Remove a node together with every connection touching it
    pub async fn remove_node(&self, id: &str, node_id: &str) -> ServiceResult<Arc<WorkflowDefinition>> {
        self.mutate(id, |wf| {
            let before = wf.nodes.len();
            wf.nodes.retain(|n| n.id != node_id);
            if wf.nodes.len() == before {
                return Err(ServiceError::NotFound(format!("node '{}'", node_id)));
            }
            wf.connections
                .retain(|c| c.source != node_id && c.target != node_id);
            Ok(())
        })
        .await
    }

    pub async fn add_connection(&self, id: &str, connection: Connection) -> ServiceResult<Arc<WorkflowDefinition>> {
        self.mutate(id, |wf| {
            for end in [&connection.source, &connection.target] {
                if wf.node(end).is_none() {
                    return Err(ServiceError::Invalid(format!(
                        "connection references unknown node '{}'",
                        end
                    )));
                }
            }
            if wf.connection(&connection.id).is_some() {
                return Err(ServiceError::Conflict(format!(
                    "connection '{}' already exists",
                    connection.id
                )));
            }
            wf.connections.push(connection);
            Ok(())
        })
        .await
    }

    pub async fn remove_connection(&self, id: &str, connection_id: &str) -> ServiceResult<Arc<WorkflowDefinition>> {
        self.mutate(id, |wf| {
            let before = wf.connections.len();
            wf.connections.retain(|c| c.id != connection_id);
            if wf.connections.len() == before {
                return Err(ServiceError::NotFound(format!("connection '{}'", connection_id)));
            }
            Ok(())
        })
        .await
    }

    /// Validate the graph and mark the workflow Published
    pub async fn publish(&self, id: &str) -> ServiceResult<Arc<WorkflowDefinition>> {
        let orchestrator = Arc::clone(&self.orchestrator);
        self.mutate(id, move |wf| {
            orchestrator.prepare(wf)?;
            wf.status = WorkflowStatus::Published;
            Ok(())
        })
        .await
    }

    /// Archive a workflow; it can no longer be edited or executed
    pub async fn archive(&self, id: &str) -> ServiceResult<Arc<WorkflowDefinition>> {
        self.mutate(id, |wf| {
            wf.status = WorkflowStatus::Archived;
            Ok(())
        })
        .await
    }

    pub async fn diagram(&self, id: &str, format: DiagramFormat) -> ServiceResult<String> {
        let workflow = self.get_workflow(id).await?;
        Ok(diagram::render(&workflow, format))
    }

    /// Run the current snapshot of a workflow and persist the report
    pub async fn execute(&self, id: &str, input: DataMap, options: RunOptions) -> ServiceResult<RunReport> {
        let workflow = self.get_workflow(id).await?;
        if !workflow.is_executable() {
            return Err(ServiceError::Archived(id.to_string()));
        }
        self.ensure_new_run(&options).await?;

        let report = self.orchestrator.execute(workflow, input, options).await?;
        self.storage.save_execution(&report).await?;
        Ok(report)
    }

    /// Resume from a checkpoint saved by an earlier run
    pub async fn resume(&self, run_id: &str, checkpoint_key: &str, options: RunOptions) -> ServiceResult<RunReport> {
        let snapshot = self
            .checkpoints
            .load(run_id, checkpoint_key)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("checkpoint '{}' of run '{}'", checkpoint_key, run_id))
            })?;

        let workflow = self.get_workflow(&snapshot.workflow_id).await?;
        if !workflow.is_executable() {
            return Err(ServiceError::Archived(workflow.id.clone()));
        }
        self.ensure_new_run(&options).await?;

        let report = self.orchestrator.resume(workflow, &snapshot, options).await?;
        self.storage.save_execution(&report).await?;
        Ok(report)
    }

    /// Refuse a caller-assigned run id that already has a stored report
    ///
    /// Ids still in flight are refused by the orchestrator itself.
    async fn ensure_new_run(&self, options: &RunOptions) -> ServiceResult<()> {
        if let Some(run_id) = options.run_id.as_deref() {
            if self.storage.get_execution(run_id).await?.is_some() {
                return Err(ServiceError::Conflict(format!("run '{}' already exists", run_id)));
            }
        }
        Ok(())
    }

    pub async fn cancel(&self, run_id: &str) -> bool {
        self.orchestrator.cancel(run_id).await
    }

    pub async fn active_runs(&self) -> Vec<ActiveRun> {
        self.orchestrator.active_runs().await
    }

    pub async fn get_execution(&self, run_id: &str) -> ServiceResult<RunReport> {
        self.storage
            .get_execution(run_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("execution '{}'", run_id)))
    }

    pub async fn list_executions(&self, workflow_id: &str) -> ServiceResult<Vec<ExecutionMetadata>> {
        self.get_workflow(workflow_id).await?;
        Ok(self.storage.list_executions(workflow_id).await?)
    }

    pub async fn checkpoints(&self, run_id: &str) -> ServiceResult<Vec<CheckpointSnapshot>> {
        Ok(self.checkpoints.list(run_id).await?)
    }

    /// Apply an edit to a copy of the current snapshot, persist it and swap
    /// it into the registry
    async fn mutate<F>(&self, id: &str, edit: F) -> ServiceResult<Arc<WorkflowDefinition>>
    where
        F: FnOnce(&mut WorkflowDefinition) -> ServiceResult<()>,
    {
        let _guard = self.writes.lock().await;
        let current = self.get_workflow(id).await?;
        if current.status == WorkflowStatus::Archived {
            return Err(ServiceError::Archived(id.to_string()));
        }

        let mut next = (*current).clone();
        edit(&mut next)?;
        next.touch();

        self.storage.save_workflow(&next).await?;
        let snapshot = self.registry.publish(next);
        tracing::info!("🔥 Hot-reloaded workflow: {} (v{})", snapshot.id, snapshot.version);
        Ok(snapshot)
    }
}

fn check_unique_ids(workflow: &WorkflowDefinition) -> ServiceResult<()> {
    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = workflow.nodes.iter().find(|n| !seen.insert(n.id.as_str())) {
        return Err(ServiceError::Conflict(format!("duplicate node id '{}'", dup.id)));
    }
    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = workflow.connections.iter().find(|c| !seen.insert(c.id.as_str())) {
        return Err(ServiceError::Conflict(format!("duplicate connection id '{}'", dup.id)));
    }
    Ok(())
}
