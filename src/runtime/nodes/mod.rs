//! Built-in node executors, one per node type.

mod agent;
mod checkpoint;
mod conditional;
mod end;
mod function;
mod parallel;
mod start;

pub use agent::{AgentExecutor, PROVIDER_ERROR_KEY};
pub use checkpoint::{checkpoint_key, checkpoint_output, CheckpointExecutor};
pub use conditional::{ConditionalExecutor, SELECTED_BRANCH_KEY};
pub use end::EndExecutor;
pub use function::FunctionExecutor;
pub use parallel::{ParallelExecutor, PARALLEL_BRANCHES_KEY};
pub use start::StartExecutor;

use crate::error::NodeError;
use crate::workflow::types::{AgentDefinition, Node};
use serde_json::Value;

/// Current time as an RFC 3339 JSON string
pub(crate) fn timestamp() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

pub(crate) fn require_outputs(node: &Node, min: usize) -> Result<(), String> {
    if node.output_ports.len() < min {
        return Err(format!(
            "{} node needs at least {} output port(s), found {}",
            node.node_type,
            min,
            node.output_ports.len()
        ));
    }
    Ok(())
}

pub(crate) fn require_inputs(node: &Node, min: usize) -> Result<(), String> {
    if node.input_ports.len() < min {
        return Err(format!(
            "{} node needs at least {} input port(s), found {}",
            node.node_type,
            min,
            node.input_ports.len()
        ));
    }
    Ok(())
}

pub(crate) fn require_agent(node: &Node) -> Result<(), String> {
    match node.agent {
        Some(_) => Ok(()),
        None => Err(format!("{} node requires an agent definition", node.node_type)),
    }
}

pub(crate) fn agent_of(node: &Node) -> Result<&AgentDefinition, NodeError> {
    node.agent.as_ref().ok_or_else(|| NodeError::MissingAgent {
        node_id: node.id.clone(),
    })
}
