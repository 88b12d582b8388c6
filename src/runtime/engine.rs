//! Concurrent DAG orchestrator
//!
//! Walks a validated [`WorkflowGraph`] from its Start node (or from a
//! restored checkpoint), running every ready node as a tokio task and
//! feeding each successor the merged output of its active predecessors.
//! The loop owns all run state; node tasks only ever hand back results.

use crate::error::{EngineError, NodeError};
use crate::runtime::checkpoint::CheckpointSnapshot;
use crate::runtime::context::{
    ExecutionContext, NodeContext, NodeLogEntry, NodeStatus, ResumeInfo, RunOptions, RunReport,
    RunStatus, Settlement,
};
use crate::runtime::executor::{ExecutorRegistry, NodeExecutor};
use crate::runtime::nodes::{checkpoint_key, checkpoint_output, PROVIDER_ERROR_KEY, SELECTED_BRANCH_KEY};
use crate::runtime::predicate;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::{Connection, ConnectionKind, DataMap, Node, NodeType, WorkflowDefinition};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use petgraph::graph::NodeIndex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Public view of a run currently in flight
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRun {
    pub run_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
struct RunSlot {
    info: ActiveRun,
    cancel: CancellationToken,
}

/// Runs workflow snapshots against a registry of node executors
///
/// Besides executing, the orchestrator keeps an arena of active runs so a
/// run can be cancelled by id from anywhere holding the orchestrator.
#[derive(Debug)]
pub struct ExecutionOrchestrator {
    executors: Arc<ExecutorRegistry>,
    default_timeout: Duration,
    max_concurrency: usize,
    runs: RwLock<HashMap<String, RunSlot>>,
}

/// Where a run starts from
enum Seed {
    Fresh(DataMap),
    Resume {
        index: NodeIndex,
        snapshot: CheckpointSnapshot,
    },
}

/// Why the traversal loop stopped
enum Stop {
    Finished,
    Failed(EngineError),
    TimedOut,
    Cancelled,
}

/// What the loop should do after a node task finished
enum Step {
    Continue,
    Fatal(EngineError),
    Interrupted,
}

#[derive(Debug)]
struct NodeOutcome {
    index: NodeIndex,
    started_at: DateTime<Utc>,
    result: Result<DataMap, NodeError>,
}

impl ExecutionOrchestrator {
    pub fn new(executors: Arc<ExecutorRegistry>) -> Self {
        Self {
            executors,
            default_timeout: DEFAULT_RUN_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Timeout applied when the caller does not pass one
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Upper bound on node tasks executing at the same time
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    /// Validate nodes, then check structure and acyclicity
    ///
    /// Nothing executes if this fails.
    pub fn prepare(&self, workflow: &WorkflowDefinition) -> Result<WorkflowGraph, EngineError> {
        let violations = self.executors.validate(&workflow.nodes);
        if !violations.is_empty() {
            tracing::error!(
                "❌ Workflow '{}' failed validation with {} violation(s)",
                workflow.id,
                violations.len()
            );
            return Err(EngineError::ValidationFailed { violations });
        }
        WorkflowGraph::build(workflow)
    }

    /// Execute a workflow from its Start node
    ///
    /// Pre-run errors (validation, structure, cycles, a run id already in
    /// flight) are returned as `Err`. Anything that goes wrong once nodes are running is reported inside
    /// the returned [`RunReport`].
    pub async fn execute(
        &self,
        workflow: Arc<WorkflowDefinition>,
        input: DataMap,
        options: RunOptions,
    ) -> Result<RunReport, EngineError> {
        let graph = self.prepare(&workflow)?;
        self.run(&workflow, &graph, Seed::Fresh(input), options).await
    }

    /// Start a new run from a stored checkpoint
    ///
    /// The checkpoint node's output is restored from the snapshot. Nodes
    /// that only fed the checkpoint stay skipped; everything else, side
    /// branches off Start included, runs again with the original input.
    pub async fn resume(
        &self,
        workflow: Arc<WorkflowDefinition>,
        snapshot: &CheckpointSnapshot,
        options: RunOptions,
    ) -> Result<RunReport, EngineError> {
        let graph = self.prepare(&workflow)?;

        let mut issues = Vec::new();
        if snapshot.workflow_id != workflow.id {
            issues.push(format!(
                "checkpoint '{}' belongs to workflow '{}', not '{}'",
                snapshot.checkpoint_key, snapshot.workflow_id, workflow.id
            ));
        }
        let index = graph
            .index_of(&snapshot.node_id)
            .filter(|&i| graph.node(i).node_type == NodeType::CheckpointAgent);
        if index.is_none() {
            issues.push(format!(
                "checkpoint node '{}' is not a CheckpointAgent of workflow '{}'",
                snapshot.node_id, workflow.id
            ));
        }
        let index = match index {
            Some(index) if issues.is_empty() => index,
            _ => return Err(EngineError::GraphStructure { issues }),
        };

        let seed = Seed::Resume {
            index,
            snapshot: snapshot.clone(),
        };
        self.run(&workflow, &graph, seed, options).await
    }

    /// Cancel an active run. Returns false when no such run is in flight.
    pub async fn cancel(&self, run_id: &str) -> bool {
        match self.runs.read().await.get(run_id) {
            Some(slot) => {
                tracing::info!("🛑 Cancellation requested for run {}", run_id);
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Runs currently in flight, oldest first
    pub async fn active_runs(&self) -> Vec<ActiveRun> {
        let mut runs: Vec<ActiveRun> = self
            .runs
            .read()
            .await
            .values()
            .map(|slot| slot.info.clone())
            .collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    async fn run(
        &self,
        workflow: &WorkflowDefinition,
        graph: &WorkflowGraph,
        seed: Seed,
        options: RunOptions,
    ) -> Result<RunReport, EngineError> {
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let cancel = options
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_else(CancellationToken::new);
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut status = RunStatus::Pending;
        {
            let mut runs = self.runs.write().await;
            if runs.contains_key(&run_id) {
                tracing::warn!("⚠️ Refusing run {}: a run with this id is already active", run_id);
                return Err(EngineError::DuplicateRun { run_id });
            }
            runs.insert(
                run_id.clone(),
                RunSlot {
                    info: ActiveRun {
                        run_id: run_id.clone(),
                        workflow_id: workflow.id.clone(),
                        status,
                        started_at,
                    },
                    cancel: cancel.clone(),
                },
            );
        }
        self.advance(&run_id, &mut status, RunStatus::Running).await;

        tracing::info!(
            "🚀 Starting run {} of workflow '{}' (v{}, {} nodes)",
            run_id,
            workflow.id,
            workflow.version,
            graph.node_count()
        );

        let mut state = RunState::new(
            graph,
            ExecutionContext::new(&run_id, &workflow.id, cancel.clone()),
        );
        let resumed_from = state.seed(seed);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let stop = loop {
            state.spawn_ready(&mut tasks, &semaphore, &self.executors);
            if tasks.is_empty() {
                break Stop::Finished;
            }

            tokio::select! {
                _ = &mut deadline => break Stop::TimedOut,
                _ = cancel.cancelled() => break Stop::Cancelled,
                joined = tasks.join_next() => {
                    let step = match joined {
                        Some(Ok(outcome)) => state.complete(outcome),
                        Some(Err(err)) => state.task_failed(err),
                        None => break Stop::Finished,
                    };
                    match step {
                        Step::Continue => {}
                        Step::Fatal(err) => break Stop::Failed(err),
                        Step::Interrupted => break Stop::Cancelled,
                    }
                }
            }
        };

        if !matches!(stop, Stop::Finished) {
            cancel.cancel();
        }
        tasks.abort_all();
        state.abandon_in_flight();

        let elapsed = clock.elapsed();
        let (next, error) = match stop {
            Stop::Finished => {
                tracing::info!("🎉 Run {} of '{}' completed in {:?}", run_id, workflow.id, elapsed);
                (RunStatus::Completed, None)
            }
            Stop::Failed(err) => {
                tracing::error!("❌ Run {} of '{}' failed after {:?}: {}", run_id, workflow.id, elapsed, err);
                (RunStatus::Failed, Some(err))
            }
            Stop::TimedOut => {
                tracing::warn!("⏱️ Run {} of '{}' timed out after {:?}", run_id, workflow.id, timeout);
                let after_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                (RunStatus::TimedOut, Some(EngineError::Timeout { after_ms }))
            }
            Stop::Cancelled => {
                tracing::warn!("🛑 Run {} of '{}' cancelled after {:?}", run_id, workflow.id, elapsed);
                (RunStatus::Cancelled, Some(EngineError::Cancelled))
            }
        };
        let complete = next == RunStatus::Completed;
        self.advance(&run_id, &mut status, next).await;
        self.runs.write().await.remove(&run_id);

        let output = state.final_output(complete);
        let ctx = state.ctx;
        Ok(RunReport {
            run_id,
            workflow_id: workflow.id.clone(),
            workflow_version: workflow.version,
            status,
            output,
            complete,
            log: ctx.log,
            error,
            branch_failures: ctx.errors,
            started_at,
            finished_at: Utc::now(),
            resumed_from,
        })
    }

    async fn advance(&self, run_id: &str, status: &mut RunStatus, next: RunStatus) {
        if let Err(err) = status.transition(next) {
            tracing::error!("❌ Run {}: {}", run_id, err);
            return;
        }
        if let Some(slot) = self.runs.write().await.get_mut(run_id) {
            slot.info.status = *status;
        }
    }
}

/// Whether a connection out of `source` is followed, given its output
fn is_taken(source: &Node, output: &DataMap, connection: &Connection) -> bool {
    if source.node_type == NodeType::End {
        return false;
    }
    match connection.kind {
        ConnectionKind::DataFlow | ConnectionKind::ControlFlow => true,
        ConnectionKind::Conditional => match &connection.condition {
            Some(expr) => predicate::evaluate(expr, output),
            None => {
                let selected = output.get(SELECTED_BRANCH_KEY).and_then(Value::as_str);
                match (connection.label.as_deref(), selected) {
                    (Some(label), Some(selected)) => label.eq_ignore_ascii_case(selected),
                    _ => false,
                }
            }
        },
    }
}

/// Provider failure reported by the node itself, if any
///
/// Only counts when `failed_node_id` names this node, so an upstream
/// failure merged into the input is not blamed on it.
fn provider_failure(node: &Node, output: &DataMap) -> Option<String> {
    let blamed = output
        .get("failed_node_id")
        .and_then(Value::as_str)
        .is_some_and(|id| id == node.id);
    if !blamed {
        return None;
    }
    output.get(PROVIDER_ERROR_KEY).map(|value| match value {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    })
}

async fn run_node(
    index: NodeIndex,
    node: Node,
    input: DataMap,
    ctx: NodeContext,
    executor: Option<Arc<dyn NodeExecutor>>,
    semaphore: Arc<Semaphore>,
) -> NodeOutcome {
    let permit = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        permit = semaphore.acquire_owned() => permit.ok(),
    };
    let started_at = Utc::now();

    let result = match (permit, executor) {
        (None, _) => Err(NodeError::Cancelled {
            node_id: node.id.clone(),
        }),
        (Some(_permit), None) => Err(NodeError::Failed {
            node_id: node.id.clone(),
            reason: format!("no executor registered for node type {}", node.node_type),
        }),
        (Some(_permit), Some(executor)) => {
            tracing::info!("📍 Executing node '{}' (type: {})", node.id, node.node_type);
            let call = AssertUnwindSafe(executor.execute(&node, &input, &ctx)).catch_unwind();
            tokio::select! {
                _ = ctx.cancel.cancelled() => Err(NodeError::Cancelled { node_id: node.id.clone() }),
                outcome = call => outcome.unwrap_or_else(|_| Err(NodeError::Failed {
                    node_id: node.id.clone(),
                    reason: "executor panicked".to_string(),
                })),
            }
        }
    };

    NodeOutcome {
        index,
        started_at,
        result,
    }
}

/// Traversal bookkeeping for a single run
struct RunState<'g> {
    graph: &'g WorkflowGraph,
    ctx: ExecutionContext,
    /// Nodes whose failures are absorbed by a best-effort fan-out
    tolerant: HashSet<NodeIndex>,
    /// Queued, running or settled
    scheduled: HashSet<NodeIndex>,
    ready: VecDeque<(NodeIndex, DataMap)>,
    in_flight: HashMap<NodeIndex, DateTime<Utc>>,
    /// Which node each spawned task runs
    task_nodes: HashMap<Id, NodeIndex>,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g WorkflowGraph, ctx: ExecutionContext) -> Self {
        Self {
            graph,
            ctx,
            tolerant: graph.best_effort_nodes(),
            scheduled: HashSet::new(),
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            task_nodes: HashMap::new(),
        }
    }

    /// Queue the entry point and settle everything that can never run
    fn seed(&mut self, seed: Seed) -> Option<ResumeInfo> {
        let graph = self.graph;
        let resumed_from = match seed {
            Seed::Fresh(input) => {
                self.ctx.run_input = Arc::new(input.clone());
                let start = graph.start();
                self.scheduled.insert(start);
                self.ready.push_back((start, input));
                None
            }
            Seed::Resume { index, snapshot } => {
                for other in graph.upstream_only(index) {
                    self.scheduled.insert(other);
                    self.ctx.settle(&graph.node(other).id, Settlement::Skipped);
                }

                let node = graph.node(index);
                let key = checkpoint_key(node);
                let output = checkpoint_output(&snapshot.data, key);
                tracing::info!(
                    "♻️ Resuming from checkpoint '{}' of run {} at node '{}'",
                    snapshot.checkpoint_key,
                    snapshot.run_id,
                    node.id
                );
                self.ctx.log.push(
                    NodeLogEntry::new(node, Utc::now(), NodeStatus::Restored).with_output(output.clone()),
                );
                self.scheduled.insert(index);
                self.ctx.settle(&node.id, Settlement::Done(output));

                // Side branches that bypass the checkpoint replay from Start
                self.ctx.run_input = Arc::new(snapshot.run_input.clone());
                let start = graph.start();
                if self.scheduled.insert(start) {
                    self.ready.push_back((start, snapshot.run_input.clone()));
                }

                Some(ResumeInfo {
                    run_id: snapshot.run_id,
                    checkpoint_key: snapshot.checkpoint_key,
                    node_id: snapshot.node_id,
                })
            }
        };

        for &index in graph.topological_order() {
            self.consider(index);
        }
        resumed_from
    }

    fn spawn_ready(
        &mut self,
        tasks: &mut JoinSet<NodeOutcome>,
        semaphore: &Arc<Semaphore>,
        executors: &ExecutorRegistry,
    ) {
        let graph = self.graph;
        while let Some((index, input)) = self.ready.pop_front() {
            let node = graph.node(index).clone();
            let executor = executors.get(node.node_type);
            let successors = graph
                .outgoing(index)
                .into_iter()
                .map(|(target, _)| graph.node(target).id.clone())
                .collect();
            let ctx = self.ctx.node_context(successors);

            self.in_flight.insert(index, Utc::now());
            let handle = tasks.spawn(run_node(index, node, input, ctx, executor, Arc::clone(semaphore)));
            self.task_nodes.insert(handle.id(), index);
        }
    }

    /// Fold a finished node task into the run
    fn complete(&mut self, outcome: NodeOutcome) -> Step {
        let graph = self.graph;
        let NodeOutcome {
            index,
            started_at,
            result,
        } = outcome;
        let node = graph.node(index);

        match result {
            Err(err) if err.is_cancelled() && self.ctx.cancel.is_cancelled() => Step::Interrupted,
            Err(err) => {
                self.in_flight.remove(&index);
                let reason = err.to_string();
                let error = EngineError::from(err);
                self.fail(index, started_at, reason, None, error)
            }
            Ok(output) => {
                self.in_flight.remove(&index);
                if let Some(message) = provider_failure(node, &output) {
                    let error = EngineError::Provider {
                        node_id: node.id.clone(),
                        message: message.clone(),
                    };
                    if !node.property_flag("continue_on_provider_error") {
                        return self.fail(index, started_at, message, Some(output), error);
                    }
                    tracing::warn!("⚠️ Node '{}' continues past provider error: {}", node.id, message);
                    self.ctx.errors.push(error);
                }

                tracing::info!("✅ Node '{}' completed", node.id);
                self.ctx.log.push(
                    NodeLogEntry::new(node, started_at, NodeStatus::Completed).with_output(output.clone()),
                );
                self.settle(index, Settlement::Done(output));
                Step::Continue
            }
        }
    }

    /// A node task that ended without handing back an outcome
    fn task_failed(&mut self, err: JoinError) -> Step {
        tracing::error!("❌ Node task aborted unexpectedly: {}", err);
        let reason = if err.is_panic() {
            "node task panicked".to_string()
        } else {
            err.to_string()
        };
        match self.task_nodes.get(&err.id()).copied() {
            Some(index) => {
                let started_at = self.in_flight.remove(&index).unwrap_or_else(Utc::now);
                let error = EngineError::NodeExecutionFailed {
                    node_id: self.graph.node(index).id.clone(),
                    reason: reason.clone(),
                };
                self.fail(index, started_at, reason, None, error)
            }
            None => Step::Fatal(EngineError::NodeExecutionFailed {
                node_id: format!("task {}", err.id()),
                reason,
            }),
        }
    }

    fn fail(
        &mut self,
        index: NodeIndex,
        started_at: DateTime<Utc>,
        reason: String,
        output: Option<DataMap>,
        error: EngineError,
    ) -> Step {
        let graph = self.graph;
        let node = graph.node(index);
        let mut entry = NodeLogEntry::new(node, started_at, NodeStatus::Failed).with_error(reason.clone());
        if let Some(output) = output {
            entry = entry.with_output(output);
        }
        self.ctx.log.push(entry);

        if self.tolerant.contains(&index) {
            tracing::warn!("⚠️ Node '{}' failed inside a best-effort fan-out: {}", node.id, reason);
            self.ctx.errors.push(error);
            self.settle(index, Settlement::Failed);
            Step::Continue
        } else {
            tracing::error!("❌ Node '{}' failed: {}", node.id, reason);
            self.ctx.settle(&node.id, Settlement::Failed);
            // A branch failure under fail-fast is its ParallelAgent's failure
            let error = match graph.branch_owner(index) {
                Some(owner) => EngineError::NodeExecutionFailed {
                    node_id: graph.node(owner).id.clone(),
                    reason: format!("branch '{}' failed: {}", node.id, reason),
                },
                None => EngineError::NodeExecutionFailed {
                    node_id: node.id.clone(),
                    reason,
                },
            };
            Step::Fatal(error)
        }
    }

    fn settle(&mut self, index: NodeIndex, settlement: Settlement) {
        let graph = self.graph;
        self.scheduled.insert(index);
        self.ctx.settle(&graph.node(index).id, settlement);
        for (target, _) in graph.outgoing(index) {
            self.consider(target);
        }
    }

    /// Queue or skip a node once every predecessor has settled
    fn consider(&mut self, index: NodeIndex) {
        if self.scheduled.contains(&index) {
            return;
        }
        let graph = self.graph;
        let incoming = graph.incoming(index);
        if !incoming
            .iter()
            .all(|(pred, _)| self.ctx.is_settled(&graph.node(*pred).id))
        {
            return;
        }

        match self.merge_inputs(index) {
            Some(input) => {
                self.scheduled.insert(index);
                self.ready.push_back((index, input));
            }
            None => {
                tracing::debug!("⏭️ Skipping node '{}': no active incoming connection", graph.node(index).id);
                self.settle(index, Settlement::Skipped);
            }
        }
    }

    /// Merge the outputs carried by active incoming connections
    ///
    /// Connections are applied in declaration order, so on key collisions
    /// the later declared one wins. Returns `None` when no incoming
    /// connection is active.
    fn merge_inputs(&self, index: NodeIndex) -> Option<DataMap> {
        let graph = self.graph;
        let mut merged = DataMap::new();
        let mut branches = DataMap::new();
        let mut active = false;

        for (pred, link) in graph.incoming(index) {
            let source = graph.node(pred);
            let Some(output) = self.ctx.output(&source.id) else {
                continue;
            };
            if !is_taken(source, output, &link.connection) {
                continue;
            }
            active = true;
            if link.connection.carries_data() {
                merged.extend(output.clone());
                branches.insert(source.id.clone(), Value::Object(output.clone()));
            }
        }

        if !active {
            return None;
        }
        if branches.len() >= 2 {
            merged.insert("branch_outputs".into(), Value::Object(branches));
        }
        Some(merged)
    }

    /// Log every node still in flight as cancelled
    fn abandon_in_flight(&mut self) {
        let graph = self.graph;
        for &index in graph.topological_order() {
            if let Some(started_at) = self.in_flight.remove(&index) {
                let node = graph.node(index);
                tracing::debug!("🛑 Abandoning in-flight node '{}'", node.id);
                self.ctx.log.push(
                    NodeLogEntry::new(node, started_at, NodeStatus::Cancelled).with_error("cancelled"),
                );
            }
        }
    }

    /// Union of terminal node outputs in topological order
    ///
    /// A run that stopped early has no reliable terminals, so every
    /// completed output is folded in instead.
    fn final_output(&self, complete: bool) -> DataMap {
        let graph = self.graph;
        let mut output = DataMap::new();
        for &index in graph.topological_order() {
            let node = graph.node(index);
            let Some(data) = self.ctx.output(&node.id) else {
                continue;
            };
            let terminal = node.node_type == NodeType::End
                || !graph
                    .outgoing(index)
                    .iter()
                    .any(|(_, link)| is_taken(node, data, &link.connection));
            if terminal || !complete {
                output.extend(data.clone());
            }
        }
        output
    }
}
