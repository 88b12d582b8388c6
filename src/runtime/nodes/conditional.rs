use super::require_agent;
use crate::error::NodeError;
use crate::runtime::context::NodeContext;
use crate::runtime::executor::NodeExecutor;
use crate::runtime::predicate;
use crate::workflow::types::{DataMap, Node, NodeType};
use futures::future::BoxFuture;
use serde_json::{json, Value};

/// Output key read by conditional connections to pick a branch
pub const SELECTED_BRANCH_KEY: &str = "selected_branch";

/// Evaluates a predicate and names the branch to follow
#[derive(Debug, Default)]
pub struct ConditionalExecutor;

impl ConditionalExecutor {
    /// Predicate from the node properties, falling back to the agent's
    fn condition(node: &Node) -> Option<&str> {
        node.property_str("condition")
            .or_else(|| {
                node.agent
                    .as_ref()
                    .and_then(|a| a.properties.get("condition"))
                    .and_then(Value::as_str)
            })
            .filter(|c| !c.trim().is_empty())
    }
}

impl NodeExecutor for ConditionalExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::ConditionalAgent
    }

    fn validate(&self, node: &Node) -> Result<(), String> {
        require_agent(node)?;
        if Self::condition(node).is_none() {
            return Err("ConditionalAgent node requires a 'condition' expression".to_string());
        }
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: &'a DataMap,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<DataMap, NodeError>> {
        Box::pin(async move {
            let expression = Self::condition(node).ok_or_else(|| NodeError::Failed {
                node_id: node.id.clone(),
                reason: "no condition expression".to_string(),
            })?;
            let result = predicate::evaluate(expression, input);
            let branch = if result {
                node.property_str("true_branch").unwrap_or("true")
            } else {
                node.property_str("false_branch").unwrap_or("false")
            };
            tracing::debug!("🔀 Node '{}' evaluated '{}' -> {}", node.id, expression, branch);

            let mut output = input.clone();
            output.insert("condition_result".into(), json!(result));
            output.insert(SELECTED_BRANCH_KEY.into(), json!(branch));
            output.insert("condition_expression".into(), json!(expression));
            Ok(output)
        })
    }
}
