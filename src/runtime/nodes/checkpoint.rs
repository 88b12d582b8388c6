use super::require_agent;
use crate::error::NodeError;
use crate::runtime::checkpoint::{CheckpointSnapshot, CheckpointStore};
use crate::runtime::context::NodeContext;
use crate::runtime::executor::NodeExecutor;
use crate::workflow::types::{DataMap, Node, NodeType};
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;

/// Snapshot key for a checkpoint node, defaulting to its id
pub fn checkpoint_key(node: &Node) -> &str {
    node.property_str("checkpoint_key").unwrap_or(&node.id)
}

/// Output a checkpoint node produces for `data`, whether executed or
/// restored from a snapshot
pub fn checkpoint_output(data: &DataMap, key: &str) -> DataMap {
    let mut output = data.clone();
    output.insert("checkpoint_key".into(), json!(key));
    output
}

/// Persists its input through the checkpoint store
pub struct CheckpointExecutor {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointExecutor {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }
}

impl NodeExecutor for CheckpointExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::CheckpointAgent
    }

    fn validate(&self, node: &Node) -> Result<(), String> {
        require_agent(node)
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: &'a DataMap,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<DataMap, NodeError>> {
        Box::pin(async move {
            let key = checkpoint_key(node);
            let snapshot = CheckpointSnapshot {
                run_id: ctx.run_id.clone(),
                workflow_id: ctx.workflow_id.clone(),
                checkpoint_key: key.to_string(),
                node_id: node.id.clone(),
                data: input.clone(),
                run_input: (*ctx.run_input).clone(),
                created_at: Utc::now(),
            };

            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Err(NodeError::Cancelled { node_id: node.id.clone() });
                }
                saved = self.store.save(&snapshot) => {
                    saved.map_err(|e| NodeError::Checkpoint {
                        node_id: node.id.clone(),
                        reason: e.to_string(),
                    })?;
                }
            }

            tracing::info!("💾 Checkpoint '{}' saved for run {}", key, ctx.run_id);
            Ok(checkpoint_output(input, key))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::checkpoint::InMemoryCheckpointStore;
    use crate::workflow::types::AgentDefinition;

    fn node() -> Node {
        Node::simple("cp", "Save", NodeType::CheckpointAgent)
            .with_agent(AgentDefinition::new("Saver", "ollama", "llama3"))
    }

    #[tokio::test]
    async fn test_saves_snapshot_and_tags_output() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let executor = CheckpointExecutor::new(store.clone());
        let node = node().with_property("checkpoint_key", "after-research");
        let mut input = DataMap::new();
        input.insert("notes".into(), json!("draft"));

        let ctx = NodeContext::detached("run-1", "wf-1");
        let output = executor.execute(&node, &input, &ctx).await.unwrap();
        assert_eq!(output["checkpoint_key"], json!("after-research"));
        assert_eq!(output["notes"], json!("draft"));

        let snapshot = store.load("run-1", "after-research").await.unwrap().unwrap();
        assert_eq!(snapshot.data, input);
        assert_eq!(snapshot.node_id, "cp");
        assert_eq!(snapshot.workflow_id, "wf-1");

        executor.execute(&node, &input, &ctx).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_key_defaults_to_node_id() {
        assert_eq!(checkpoint_key(&node()), "cp");
    }
}
