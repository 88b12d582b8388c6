//! Node executor contract and dispatch registry
//!
//! Every node type has one [`NodeExecutor`]. The orchestrator looks the
//! executor up by the node's declared type; a type without a registered
//! executor is a configuration error reported before anything runs.

use crate::error::{NodeError, Violation};
use crate::runtime::checkpoint::CheckpointStore;
use crate::runtime::context::NodeContext;
use crate::runtime::nodes::{
    AgentExecutor, CheckpointExecutor, ConditionalExecutor, EndExecutor, FunctionExecutor,
    ParallelExecutor, StartExecutor,
};
use crate::runtime::provider::ProviderInvoker;
use crate::workflow::types::{DataMap, Node, NodeType};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Per-node-type execution logic
pub trait NodeExecutor: Send + Sync + 'static {
    /// Node type this executor handles
    fn node_type(&self) -> NodeType;

    /// Pure structural check, run for every node before any execution
    fn validate(&self, node: &Node) -> Result<(), String>;

    /// Produce the node's output from the merged input of its predecessors
    ///
    /// Returns a complete output map or a [`NodeError`] naming the node.
    /// Implementations calling out to collaborators must observe
    /// `ctx.cancel`.
    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: &'a DataMap,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<DataMap, NodeError>>;
}

/// Maps node types to their executors
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.executors.keys().map(NodeType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("ExecutorRegistry").field("types", &types).finish()
    }
}

impl ExecutorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in executor for every node type
    pub fn with_defaults(
        provider: Arc<dyn ProviderInvoker>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StartExecutor));
        registry.register(Arc::new(EndExecutor));
        registry.register(Arc::new(FunctionExecutor));
        registry.register(Arc::new(AgentExecutor::llm(Arc::clone(&provider))));
        registry.register(Arc::new(AgentExecutor::tool(Arc::clone(&provider))));
        registry.register(Arc::new(AgentExecutor::mcp(provider)));
        registry.register(Arc::new(ConditionalExecutor));
        registry.register(Arc::new(ParallelExecutor));
        registry.register(Arc::new(CheckpointExecutor::new(checkpoints)));
        registry
    }

    /// Register an executor, replacing any existing one for the same type
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type();
        if self.executors.insert(node_type, executor).is_some() {
            tracing::debug!("🔁 Replaced executor for node type {}", node_type);
        }
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned()
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }

    /// Validate every node, collecting all violations
    pub fn validate(&self, nodes: &[Node]) -> Vec<Violation> {
        nodes
            .iter()
            .filter_map(|node| {
                let outcome = match self.executors.get(&node.node_type) {
                    Some(executor) => executor.validate(node),
                    None => Err(format!(
                        "no executor registered for node type {}",
                        node.node_type
                    )),
                };
                outcome.err().map(|reason| Violation {
                    node_id: node.id.clone(),
                    reason,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::checkpoint::InMemoryCheckpointStore;
    use crate::runtime::provider::ProviderRouter;

    fn defaults() -> ExecutorRegistry {
        ExecutorRegistry::with_defaults(
            Arc::new(ProviderRouter::simulated()),
            Arc::new(InMemoryCheckpointStore::new()),
        )
    }

    #[test]
    fn test_defaults_cover_every_node_type() {
        let registry = defaults();
        for node_type in NodeType::ALL {
            let executor = registry.get(node_type).unwrap();
            assert_eq!(executor.node_type(), node_type);
        }
    }

    #[test]
    fn test_validate_collects_all_violations() {
        let registry = defaults();
        let nodes = vec![
            Node::new("start", "Start", NodeType::Start),
            Node::simple("llm", "LLM", NodeType::LlmAgent),
            Node::simple("ok", "Echo", NodeType::Function),
        ];
        let violations = registry.validate(&nodes);
        let ids: Vec<&str> = violations.iter().map(|v| v.node_id.as_str()).collect();
        assert_eq!(ids, vec!["start", "llm"]);
    }

    #[test]
    fn test_missing_executor_is_a_violation() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(StartExecutor));
        let nodes = vec![Node::simple("f", "Echo", NodeType::Function)];
        let violations = registry.validate(&nodes);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].reason.contains("Function"));
        assert!(!registry.contains(NodeType::Function));
    }
}
