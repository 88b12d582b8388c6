use super::{require_agent, require_outputs};
use crate::error::NodeError;
use crate::runtime::context::NodeContext;
use crate::runtime::executor::NodeExecutor;
use crate::workflow::types::{DataMap, Node, NodeType};
use futures::future::BoxFuture;
use serde_json::json;

/// Output key listing the fan-out targets
pub const PARALLEL_BRANCHES_KEY: &str = "parallel_branches";

/// Fan-out marker
///
/// The orchestrator does the actual concurrent scheduling; this executor
/// only announces the branches and the failure policy.
#[derive(Debug, Default)]
pub struct ParallelExecutor;

impl NodeExecutor for ParallelExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::ParallelAgent
    }

    fn validate(&self, node: &Node) -> Result<(), String> {
        require_agent(node)?;
        require_outputs(node, 2)?;
        match node.property_str("failure_policy") {
            None => Ok(()),
            Some(policy)
                if policy.eq_ignore_ascii_case("fail_fast")
                    || policy.eq_ignore_ascii_case("best_effort") =>
            {
                Ok(())
            }
            Some(other) => Err(format!(
                "unknown failure_policy '{}', expected fail_fast or best_effort",
                other
            )),
        }
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: &'a DataMap,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<DataMap, NodeError>> {
        Box::pin(async move {
            let policy = node
                .property_str("failure_policy")
                .map(str::to_ascii_lowercase)
                .unwrap_or_else(|| "fail_fast".to_string());
            let mut output = input.clone();
            output.insert(PARALLEL_BRANCHES_KEY.into(), json!(ctx.successors));
            output.insert("failure_policy".into(), json!(policy));
            Ok(output)
        })
    }
}
