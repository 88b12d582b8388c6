/// Workflow Management Layer
///
/// Handles workflow definitions, persistence, and the hot-reload registry:
/// - Type definitions (WorkflowDefinition, Node, Connection, AgentDefinition)
/// - Petgraph view with structural and cycle checks
/// - SQLite persistence with sqlx
/// - Lock-free snapshot registry using ArcSwap
/// - Mermaid and DOT diagram rendering
/// - The service tying editing and execution together

// Core workflow type definitions
pub mod types;

// Petgraph view of a definition
pub mod graph;

// SQLite persistence for workflows and execution reports
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Mermaid and Graphviz rendering
pub mod diagram;

// Editing, execution and history entry points
pub mod service;

pub use service::WorkflowService;
pub use types::{AgentDefinition, Connection, ConnectionKind, DataMap, Node, NodeType, WorkflowDefinition, WorkflowStatus};
