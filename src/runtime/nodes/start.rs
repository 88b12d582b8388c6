use super::{require_outputs, timestamp};
use crate::error::NodeError;
use crate::runtime::context::NodeContext;
use crate::runtime::executor::NodeExecutor;
use crate::workflow::types::{DataMap, Node, NodeType};
use futures::future::BoxFuture;
use serde_json::json;

/// Entry node: passes the caller's input through with run bookkeeping
///
/// Each node property is re-exposed as `config_<key>`.
#[derive(Debug, Default)]
pub struct StartExecutor;

impl NodeExecutor for StartExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Start
    }

    fn validate(&self, node: &Node) -> Result<(), String> {
        require_outputs(node, 1)?;
        let required: Vec<&str> = node
            .input_ports
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        if !required.is_empty() {
            return Err(format!(
                "Start node cannot have required input ports ({})",
                required.join(", ")
            ));
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
            let mut output = input.clone();
            output.insert("workflow_started".into(), timestamp());
            output.insert("start_node_id".into(), json!(node.id));
            output.insert("start_node_name".into(), json!(node.name));
            output.insert("start_node_type".into(), json!(node.node_type.as_str()));
            for (key, value) in &node.properties {
                output.insert(format!("config_{}", key), value.clone());
            }
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::Port;

    #[tokio::test]
    async fn test_start_adds_bookkeeping_and_config() {
        let node = Node::simple("start", "Begin", NodeType::Start).with_property("topic", "rust");
        let mut input = DataMap::new();
        input.insert("x".into(), json!(1));

        let output = StartExecutor
            .execute(&node, &input, &NodeContext::detached("run", "wf"))
            .await
            .unwrap();
        assert_eq!(output["x"], json!(1));
        assert_eq!(output["start_node_id"], json!("start"));
        assert_eq!(output["start_node_name"], json!("Begin"));
        assert_eq!(output["start_node_type"], json!("Start"));
        assert_eq!(output["config_topic"], json!("rust"));
        assert!(output["workflow_started"].is_string());
    }

    #[test]
    fn test_start_port_rules() {
        let no_outputs = Node::new("s", "Start", NodeType::Start);
        assert!(StartExecutor.validate(&no_outputs).is_err());

        let mut required_input = Node::simple("s", "Start", NodeType::Start);
        required_input.input_ports.push(Port::required("payload"));
        assert!(StartExecutor.validate(&required_input).is_err());

        let optional_input = Node::simple("s", "Start", NodeType::Start).with_input("payload");
        assert!(StartExecutor.validate(&optional_input).is_ok());
    }
}
