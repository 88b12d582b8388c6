//! Error taxonomy for workflow execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A node that failed structural validation, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub node_id: String,
    pub reason: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node_id, self.reason)
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run-level errors reported by the orchestrator.
///
/// Serializable so that failed runs can be persisted with their report.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineError {
    /// One or more nodes failed structural validation. All violations are listed.
    #[error("validation failed: {}", join(.violations))]
    ValidationFailed { violations: Vec<Violation> },

    /// Missing/multiple Start nodes, dangling connections, duplicate ids.
    #[error("invalid workflow graph: {}", join(.issues))]
    GraphStructure { issues: Vec<String> },

    /// The connection graph is not acyclic.
    #[error("cycle detected between nodes: {}", .nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    /// A node raised an unrecoverable error.
    #[error("node '{node_id}' failed: {reason}")]
    NodeExecutionFailed { node_id: String, reason: String },

    /// A provider call failed. Non-fatal unless escalated by the failure policy.
    #[error("provider error at node '{node_id}': {message}")]
    Provider { node_id: String, message: String },

    #[error("workflow timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("workflow execution cancelled")]
    Cancelled,

    /// A caller-assigned run id is already in flight.
    #[error("run '{run_id}' is already active")]
    DuplicateRun { run_id: String },
}

/// Errors raised by a single node executor. Always names the node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    #[error("node '{node_id}' has no agent definition")]
    MissingAgent { node_id: String },

    #[error("checkpoint store failed at node '{node_id}': {reason}")]
    Checkpoint { node_id: String, reason: String },

    #[error("node '{node_id}' was cancelled")]
    Cancelled { node_id: String },

    #[error("node '{node_id}' failed: {reason}")]
    Failed { node_id: String, reason: String },
}

impl NodeError {
    pub fn node_id(&self) -> &str {
        match self {
            NodeError::MissingAgent { node_id }
            | NodeError::Checkpoint { node_id, .. }
            | NodeError::Cancelled { node_id }
            | NodeError::Failed { node_id, .. } => node_id,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Cancelled { .. })
    }
}

impl From<NodeError> for EngineError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Cancelled { .. } => EngineError::Cancelled,
            other => EngineError::NodeExecutionFailed {
                node_id: other.node_id().to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_violation() {
        let err = EngineError::ValidationFailed {
            violations: vec![
                Violation {
                    node_id: "a".into(),
                    reason: "needs an output port".into(),
                },
                Violation {
                    node_id: "b".into(),
                    reason: "missing agent definition".into(),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("a: needs an output port"));
        assert!(message.contains("b: missing agent definition"));
    }

    #[test]
    fn test_engine_error_serializes_with_kind_tag() {
        let err = EngineError::CycleDetected {
            nodes: vec!["x".into(), "y".into()],
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "cycle_detected");
        let back: EngineError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_node_error_conversion() {
        let err: EngineError = NodeError::MissingAgent {
            node_id: "llm".into(),
        }
        .into();
        assert!(matches!(err, EngineError::NodeExecutionFailed { ref node_id, .. } if node_id == "llm"));

        let cancelled: EngineError = NodeError::Cancelled { node_id: "x".into() }.into();
        assert_eq!(cancelled, EngineError::Cancelled);
    }
}
