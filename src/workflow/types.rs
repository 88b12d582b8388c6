//! Core workflow type definitions
//!
//! Defines workflows, nodes, ports, agent definitions and connections. These
//! types are serialized to JSON for persistence and for the HTTP API, and an
//! `Arc` snapshot of a [`WorkflowDefinition`] is what the engine executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// String-keyed data flowing between nodes.
pub type DataMap = Map<String, Value>;

/// A complete workflow definition: metadata plus the node graph
///
/// Stored as JSON in SQLite and cached in the registry as an immutable
/// snapshot. Every mutation bumps `version` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Monotonic revision, starts at 1
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Owning user
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

fn default_version() -> u32 {
    1
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl WorkflowDefinition {
    /// Create an empty draft workflow with a fresh id
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            description: String::new(),
            version: 1,
            status: WorkflowStatus::Draft,
            created_at: now,
            updated_at: now,
            owner: owner.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }

    pub fn connection(&self, connection_id: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == connection_id)
    }

    /// Nodes declared with the Start type
    pub fn start_nodes(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Start)
            .collect()
    }

    /// Record a mutation: bump the version and the update timestamp
    pub fn touch(&mut self) {
        self.version += 1;
        let now = Utc::now();
        self.updated_at = if now < self.created_at { self.created_at } else { now };
    }

    pub fn is_executable(&self) -> bool {
        self.status != WorkflowStatus::Archived
    }
}

/// Lifecycle status of a workflow definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "Draft",
            WorkflowStatus::Published => "Published",
            WorkflowStatus::Archived => "Archived",
        }
    }
}

/// A single node in the workflow graph
///
/// The node type selects the executor. Agent-bearing types carry an
/// [`AgentDefinition`] describing which model, tool or MCP server to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g. "start", "research")
    pub id: String,
    pub name: String,
    pub node_type: NodeType,
    /// Canvas position, irrelevant to execution
    #[serde(default)]
    pub position: Position,
    /// Free-form configuration, e.g. `{"condition": "score > 5"}`
    #[serde(default)]
    pub properties: DataMap,
    #[serde(default)]
    pub input_ports: Vec<Port>,
    #[serde(default)]
    pub output_ports: Vec<Port>,
    #[serde(default)]
    pub agent: Option<AgentDefinition>,
}

impl Node {
    /// Create a node with no ports, properties or agent
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type,
            position: Position::default(),
            properties: DataMap::new(),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            agent: None,
        }
    }

    /// Create a node with one port per direction, the shape most nodes use
    pub fn simple(id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        let node = Self::new(id, name, node_type);
        match node_type {
            NodeType::Start => node.with_output("out"),
            NodeType::End => node.with_input("in"),
            _ => node.with_input("in").with_output("out"),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.input_ports.push(Port::new(name));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output_ports.push(Port::new(name));
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_agent(mut self, agent: AgentDefinition) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// String property lookup
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Boolean property lookup, `false` when absent
    pub fn property_flag(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Node types understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    /// Single entry point; seeds the run with the caller's input
    Start,
    /// Terminal node; traversal stops here
    End,
    /// User-defined transform, currently a deterministic echo
    Function,
    /// Model call through the provider boundary
    #[serde(rename = "LLMAgent")]
    LlmAgent,
    /// Tool call through the provider boundary
    ToolAgent,
    /// Evaluates a predicate and selects one outgoing conditional branch
    ConditionalAgent,
    /// Fans out to every outgoing connection concurrently
    ParallelAgent,
    /// Persists a snapshot of its input for later resume
    CheckpointAgent,
    /// MCP server call through the provider boundary
    #[serde(rename = "MCPAgent")]
    McpAgent,
}

impl NodeType {
    pub const ALL: [NodeType; 9] = [
        NodeType::Start,
        NodeType::End,
        NodeType::Function,
        NodeType::LlmAgent,
        NodeType::ToolAgent,
        NodeType::ConditionalAgent,
        NodeType::ParallelAgent,
        NodeType::CheckpointAgent,
        NodeType::McpAgent,
    ];

    /// Stable identifier used for executor dispatch and serialization
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "Start",
            NodeType::End => "End",
            NodeType::Function => "Function",
            NodeType::LlmAgent => "LLMAgent",
            NodeType::ToolAgent => "ToolAgent",
            NodeType::ConditionalAgent => "ConditionalAgent",
            NodeType::ParallelAgent => "ParallelAgent",
            NodeType::CheckpointAgent => "CheckpointAgent",
            NodeType::McpAgent => "MCPAgent",
        }
    }

    /// Whether nodes of this type must carry an agent definition
    pub fn requires_agent(&self) -> bool {
        !matches!(self, NodeType::Start | NodeType::End | NodeType::Function)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 2-D canvas position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Named input or output port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    /// Required inputs must be connected for the node to be meaningful
    #[serde(default)]
    pub required: bool,
}

impl Port {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }

    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }
}

/// Agent configuration embedded in agent-bearing nodes
///
/// `provider` selects the provider implementation ("ollama", "openai",
/// "tool", "mcp", ...); the rest is passed through to it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Tool names available to ToolAgent nodes
    #[serde(default)]
    pub tools: Vec<String>,
    /// Server name for MCPAgent nodes
    #[serde(default)]
    pub mcp_server: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub properties: DataMap,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: new_id(),
            name,
            provider: provider.into(),
            model: model.into(),
            system_prompt: None,
            tools: Vec::new(),
            mcp_server: None,
            temperature: None,
            max_tokens: None,
            properties: DataMap::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_mcp_server(mut self, server: impl Into<String>) -> Self {
        self.mcp_server = Some(server.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// How a connection carries data between nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionKind {
    /// Always followed; propagates the full source output
    #[default]
    DataFlow,
    /// Always followed; orders execution without carrying data
    ControlFlow,
    /// Followed only when its condition or label matches the source output
    Conditional,
}

/// Directed edge between two nodes of the same workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default = "new_id")]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub kind: ConnectionKind,
    #[serde(default)]
    pub label: Option<String>,
    /// Predicate evaluated against the source output (Conditional only)
    #[serde(default)]
    pub condition: Option<String>,
}

impl Connection {
    /// Create a data-flow connection
    pub fn data(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(source, target, ConnectionKind::DataFlow)
    }

    /// Create a control-flow connection
    pub fn control(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(source, target, ConnectionKind::ControlFlow)
    }

    /// Create a conditional connection selected by branch label
    pub fn branch(
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        let mut connection = Self::with_kind(source, target, ConnectionKind::Conditional);
        connection.label = Some(label.into());
        connection
    }

    /// Create a conditional connection guarded by an expression
    pub fn guarded(
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        let mut connection = Self::with_kind(source, target, ConnectionKind::Conditional);
        connection.condition = Some(condition.into());
        connection
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn with_kind(source: impl Into<String>, target: impl Into<String>, kind: ConnectionKind) -> Self {
        Self {
            id: new_id(),
            source: source.into(),
            target: target.into(),
            kind,
            label: None,
            condition: None,
        }
    }

    /// Whether a taken connection propagates the source output
    pub fn carries_data(&self) -> bool {
        self.kind != ConnectionKind::ControlFlow
    }
}
