use super::{agent_of, require_agent};
use crate::error::NodeError;
use crate::runtime::context::NodeContext;
use crate::runtime::executor::NodeExecutor;
use crate::runtime::provider::{InvocationKind, ProviderError, ProviderInvoker, ProviderRequest};
use crate::workflow::types::{DataMap, Node, NodeType};
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;

/// Output key carrying a provider failure message
pub const PROVIDER_ERROR_KEY: &str = "provider_error";

/// Executor for LLM, tool and MCP nodes
///
/// All three share the same shape: hand the agent definition and input to
/// the provider, then fold the reply into the output under a type-specific
/// key. Provider failures are reported in the output map, not as errors.
pub struct AgentExecutor {
    node_type: NodeType,
    kind: InvocationKind,
    response_key: &'static str,
    provider: Arc<dyn ProviderInvoker>,
}

impl AgentExecutor {
    pub fn llm(provider: Arc<dyn ProviderInvoker>) -> Self {
        Self {
            node_type: NodeType::LlmAgent,
            kind: InvocationKind::Model,
            response_key: "llm_response",
            provider,
        }
    }

    pub fn tool(provider: Arc<dyn ProviderInvoker>) -> Self {
        Self {
            node_type: NodeType::ToolAgent,
            kind: InvocationKind::Tool,
            response_key: "tool_response",
            provider,
        }
    }

    pub fn mcp(provider: Arc<dyn ProviderInvoker>) -> Self {
        Self {
            node_type: NodeType::McpAgent,
            kind: InvocationKind::Mcp,
            response_key: "mcp_response",
            provider,
        }
    }
}

impl NodeExecutor for AgentExecutor {
    fn node_type(&self) -> NodeType {
        self.node_type
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
            let agent = agent_of(node)?;
            let request = ProviderRequest {
                kind: self.kind,
                node_id: &node.id,
                agent,
                input,
            };

            let mut output = input.clone();
            match self.provider.invoke(request, ctx.cancel.clone()).await {
                Ok(reply) => {
                    output.insert(self.response_key.into(), reply.payload);
                    output.insert("token_count".into(), json!(reply.token_count));
                    output.insert("latency_ms".into(), json!(reply.latency.as_millis() as u64));
                    output.insert("provider".into(), json!(agent.provider));
                    output.insert("model".into(), json!(agent.model));
                    output.insert("success".into(), json!(true));
                }
                Err(ProviderError::Cancelled) => {
                    return Err(NodeError::Cancelled {
                        node_id: node.id.clone(),
                    });
                }
                Err(err) => {
                    tracing::warn!("⚠️ Provider call failed for node '{}': {}", node.id, err);
                    output.insert("success".into(), json!(false));
                    output.insert(PROVIDER_ERROR_KEY.into(), json!(err.to_string()));
                    output.insert("failed_node_id".into(), json!(node.id));
                }
            }
            Ok(output)
        })
    }
}
