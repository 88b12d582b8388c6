/// Runtime Execution Engine
///
/// Everything needed to run a workflow snapshot:
/// - Per-node-type executors behind a common trait
/// - The provider boundary for model, tool and MCP calls
/// - Checkpoint stores for resumable runs
/// - The concurrent orchestrator that walks the graph

// Branch predicates used by conditional nodes and connections
pub mod predicate;

// Provider capability trait, router and simulated backends
pub mod provider;

// Checkpoint snapshots and their stores
pub mod checkpoint;

// Run state, node context and reports
pub mod context;

// Executor contract and registry
pub mod executor;

// Built-in executors, one per node type
pub mod nodes;

// Concurrent DAG orchestrator
pub mod engine;

pub use checkpoint::{CheckpointSnapshot, CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
pub use context::{NodeLogEntry, NodeStatus, RunOptions, RunReport, RunStatus};
pub use engine::{ActiveRun, ExecutionOrchestrator};
pub use executor::{ExecutorRegistry, NodeExecutor};
pub use provider::{ProviderInvoker, ProviderRouter, SimulatedProvider};
