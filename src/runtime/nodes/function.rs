use crate::error::NodeError;
use crate::runtime::context::NodeContext;
use crate::runtime::executor::NodeExecutor;
use crate::workflow::types::{DataMap, Node, NodeType};
use futures::future::BoxFuture;
use serde_json::json;

/// User-defined transform slot
///
/// No scripting backend is wired in, so the node echoes its input with a
/// placeholder result. Register a different executor for `Function` to
/// plug in real transforms.
#[derive(Debug, Default)]
pub struct FunctionExecutor;

impl NodeExecutor for FunctionExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Function
    }

    fn validate(&self, node: &Node) -> Result<(), String> {
        match node.properties.get("function") {
            Some(value) if !value.is_string() => {
                Err("Function node property 'function' must be a string".to_string())
            }
            _ => Ok(()),
        }
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: &'a DataMap,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<DataMap, NodeError>> {
        Box::pin(async move {
            let name = node.property_str("function").unwrap_or(&node.name);
            let mut output = input.clone();
            output.insert("function_node_id".into(), json!(node.id));
            output.insert("function_name".into(), json!(name));
            output.insert("function_result".into(), json!("placeholder"));
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_function_echo_is_deterministic() {
        let node = Node::simple("fmt", "Format", NodeType::Function).with_property("function", "format_report");
        let mut input = DataMap::new();
        input.insert("x".into(), json!(1));
        let ctx = NodeContext::detached("run", "wf");

        let first = FunctionExecutor.execute(&node, &input, &ctx).await.unwrap();
        let second = FunctionExecutor.execute(&node, &input, &ctx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["function_name"], json!("format_report"));
        assert_eq!(first["x"], json!(1));
    }

    #[test]
    fn test_function_property_must_be_string() {
        let node = Node::simple("f", "F", NodeType::Function).with_property("function", 5);
        assert!(FunctionExecutor.validate(&node).is_err());
    }
}
