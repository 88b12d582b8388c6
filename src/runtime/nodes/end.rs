use super::{require_inputs, timestamp};
use crate::error::NodeError;
use crate::runtime::context::NodeContext;
use crate::runtime::executor::NodeExecutor;
use crate::workflow::types::{DataMap, Node, NodeType};
use futures::future::BoxFuture;
use serde_json::json;

/// Terminal node: stamps completion and a short summary
#[derive(Debug, Default)]
pub struct EndExecutor;

impl NodeExecutor for EndExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::End
    }

    fn validate(&self, node: &Node) -> Result<(), String> {
        require_inputs(node, 1)
    }

    fn execute<'a>(
        &'a self,
        _node: &'a Node,
        input: &'a DataMap,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<DataMap, NodeError>> {
        Box::pin(async move {
            let mut output = input.clone();
            output.insert("workflow_completed".into(), timestamp());
            output.insert(
                "summary".into(),
                json!({ "input_count": input.len(), "completed": true }),
            );
            Ok(output)
        })
    }
}
