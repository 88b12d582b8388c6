/// AI PlayGround: agent workflow execution engine
///
/// Users define workflows as graphs of typed nodes (LLM, tool, MCP,
/// conditional, parallel and checkpoint agents), then execute and visualize
/// them. The engine validates the graph, runs ready nodes concurrently and
/// merges data along connections.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by the engine and its callers
pub mod error;

// Workflow management layer - definitions, storage, registry, diagrams
pub mod workflow;

// Runtime execution engine - executors, providers, checkpoints, orchestration
pub mod runtime;

// HTTP API layer - REST endpoints for editing and execution
pub mod api;

// Server setup and initialization
pub mod server;

pub use error::{EngineError, NodeError};
pub use runtime::{ExecutionOrchestrator, ExecutorRegistry, RunOptions, RunReport, RunStatus};
pub use server::start_server;
pub use workflow::{Connection, Node, NodeType, WorkflowDefinition, WorkflowService};
