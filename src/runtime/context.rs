//! Run-scoped execution state
//!
//! Everything the orchestrator tracks for a single run: the status state
//! machine, the per-node output cache, the execution log and the final
//! report handed back to callers.

use crate::error::EngineError;
use crate::workflow::types::{DataMap, Node, NodeType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a workflow run
///
/// `Pending → Running → {Completed | Failed | Cancelled | TimedOut}`.
/// Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid run transition {from:?} -> {to:?}")]
pub struct RunStateError {
    pub from: RunStatus,
    pub to: RunStatus,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "Pending",
            RunStatus::Running => "Running",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
            RunStatus::Cancelled => "Cancelled",
            RunStatus::TimedOut => "TimedOut",
        }
    }

    /// Move to `next`, rejecting anything the state machine does not allow
    pub fn transition(&mut self, next: RunStatus) -> Result<(), RunStateError> {
        let allowed = match (*self, next) {
            (RunStatus::Pending, RunStatus::Running) => true,
            (RunStatus::Pending, RunStatus::Cancelled) => true,
            (RunStatus::Running, to) => to.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(RunStateError { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

/// Outcome of a single node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Completed,
    Failed,
    Cancelled,
    /// Output re-seeded from a checkpoint rather than executed
    Restored,
}

/// One line of the per-node execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLogEntry {
    pub node_id: String,
    pub node_name: String,
    pub node_type: NodeType,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: NodeStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Option<DataMap>,
}

impl NodeLogEntry {
    pub fn new(node: &Node, started_at: DateTime<Utc>, status: NodeStatus) -> Self {
        Self {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_type: node.node_type,
            started_at,
            finished_at: Utc::now(),
            status,
            error: None,
            output: None,
        }
    }

    pub fn with_output(mut self, output: DataMap) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Where a resumed run picked up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeInfo {
    pub run_id: String,
    pub checkpoint_key: String,
    pub node_id: String,
}

/// Final result of a run, persisted as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: RunStatus,
    /// Union of all terminal node outputs
    pub output: DataMap,
    /// False when the run stopped early (failure, timeout, cancellation)
    pub complete: bool,
    pub log: Vec<NodeLogEntry>,
    #[serde(default)]
    pub error: Option<EngineError>,
    /// Failures tolerated inside best-effort fan-outs
    #[serde(default)]
    pub branch_failures: Vec<EngineError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub resumed_from: Option<ResumeInfo>,
}

impl RunReport {
    /// Log entry for a node, if it ran or was restored
    pub fn entry(&self, node_id: &str) -> Option<&NodeLogEntry> {
        self.log.iter().find(|e| e.node_id == node_id)
    }

    pub fn executed(&self, node_id: &str) -> bool {
        self.entry(node_id).is_some()
    }
}

/// Caller-supplied knobs for a single run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Upper bound for the whole run; falls back to the engine default
    pub timeout: Option<Duration>,
    /// External cancellation; the run also cancels on its own token
    pub cancel: Option<CancellationToken>,
    /// Caller-assigned run id; a fresh UUID otherwise
    pub run_id: Option<String>,
}

impl RunOptions {
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Per-call context handed to every executor
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub run_id: String,
    pub workflow_id: String,
    pub cancel: CancellationToken,
    /// Targets of the node's outgoing connections, in declaration order
    pub successors: Vec<String>,
    /// Input the run was started with
    pub run_input: Arc<DataMap>,
}

impl NodeContext {
    /// Context for calling an executor outside of a run
    pub fn detached(run_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            cancel: CancellationToken::new(),
            successors: Vec::new(),
            run_input: Arc::new(DataMap::new()),
        }
    }
}

/// How a node was settled during traversal
#[derive(Debug, Clone)]
pub(crate) enum Settlement {
    /// Ran (or was restored) and produced this output
    Done(DataMap),
    /// Failed; its outgoing connections are inactive
    Failed,
    /// Never ran: dead path, non-chosen branch or outside the resume set
    Skipped,
}

/// Mutable state owned by the orchestrator loop for one run
///
/// Only the orchestrator writes here, after a node task has finished, so
/// no locking is needed.
#[derive(Debug)]
pub struct ExecutionContext {
    pub run_id: String,
    pub workflow_id: String,
    pub cancel: CancellationToken,
    /// Input the run was started with, carried over on resume
    pub run_input: Arc<DataMap>,
    pub log: Vec<NodeLogEntry>,
    pub errors: Vec<EngineError>,
    pub(crate) settled: HashMap<String, Settlement>,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, workflow_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            cancel,
            run_input: Arc::new(DataMap::new()),
            log: Vec::new(),
            errors: Vec::new(),
            settled: HashMap::new(),
        }
    }

    pub fn node_context(&self, successors: Vec<String>) -> NodeContext {
        NodeContext {
            run_id: self.run_id.clone(),
            workflow_id: self.workflow_id.clone(),
            cancel: self.cancel.clone(),
            successors,
            run_input: Arc::clone(&self.run_input),
        }
    }

    /// Cached output of a completed node
    pub fn output(&self, node_id: &str) -> Option<&DataMap> {
        match self.settled.get(node_id) {
            Some(Settlement::Done(output)) => Some(output),
            _ => None,
        }
    }

    pub fn is_settled(&self, node_id: &str) -> bool {
        self.settled.contains_key(node_id)
    }

    pub(crate) fn settle(&mut self, node_id: &str, settlement: Settlement) {
        self.settled.insert(node_id.to_string(), settlement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut status = RunStatus::Pending;
        status.transition(RunStatus::Running).unwrap();
        status.transition(RunStatus::Completed).unwrap();
        assert!(status.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::TimedOut,
        ] {
            let mut status = terminal;
            assert!(status.transition(RunStatus::Running).is_err());
            assert!(status.transition(RunStatus::Completed).is_err());
            assert_eq!(status, terminal);
        }
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut status = RunStatus::Pending;
        let err = status.transition(RunStatus::Completed).unwrap_err();
        assert_eq!(err.from, RunStatus::Pending);
        assert_eq!(status, RunStatus::Pending);
    }

    #[test]
    fn test_context_tracks_outputs() {
        let mut ctx = ExecutionContext::new("run", "wf", CancellationToken::new());
        let mut data = DataMap::new();
        data.insert("k".into(), serde_json::json!(1));
        ctx.settle("a", Settlement::Done(data));
        ctx.settle("b", Settlement::Skipped);
        ctx.settle("c", Settlement::Failed);

        assert_eq!(ctx.output("a").unwrap()["k"], 1);
        assert!(ctx.output("b").is_none());
        assert!(ctx.is_settled("b"));
        assert!(ctx.output("c").is_none());
        assert!(ctx.is_settled("c"));
        assert!(!ctx.is_settled("d"));
    }
}
