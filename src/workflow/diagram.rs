//! Mermaid and Graphviz DOT rendering of workflow graphs
//!
//! Pure functions of the definition; nothing here validates the graph, so
//! drafts with dangling connections still render.

use crate::workflow::types::{Connection, ConnectionKind, Node, NodeType, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::str::FromStr;

/// Output format for [`render`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramFormat {
    #[default]
    Mermaid,
    Dot,
}

impl DiagramFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            DiagramFormat::Mermaid => "text/vnd.mermaid; charset=utf-8",
            DiagramFormat::Dot => "text/vnd.graphviz; charset=utf-8",
        }
    }
}

impl FromStr for DiagramFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mermaid" | "mmd" => Ok(DiagramFormat::Mermaid),
            "dot" | "graphviz" => Ok(DiagramFormat::Dot),
            other => Err(format!("unknown diagram format '{}'", other)),
        }
    }
}

pub fn render(workflow: &WorkflowDefinition, format: DiagramFormat) -> String {
    match format {
        DiagramFormat::Mermaid => to_mermaid(workflow),
        DiagramFormat::Dot => to_dot(workflow),
    }
}

/// Style class shared by both renderers
fn category(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Start => "startNode",
        NodeType::End => "endNode",
        NodeType::Function => "functionNode",
        NodeType::ConditionalAgent => "conditionNode",
        NodeType::ParallelAgent => "parallelNode",
        NodeType::CheckpointAgent => "checkpointNode",
        NodeType::LlmAgent | NodeType::ToolAgent | NodeType::McpAgent => "agentNode",
    }
}

fn icon(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Start => "🚀",
        NodeType::End => "🏁",
        NodeType::Function => "⚙️",
        NodeType::LlmAgent => "🤖",
        NodeType::ToolAgent => "🛠️",
        NodeType::McpAgent => "🔌",
        NodeType::ConditionalAgent => "🔀",
        NodeType::ParallelAgent => "⚡",
        NodeType::CheckpointAgent => "💾",
    }
}

/// Edge label: explicit label first, then the guarding condition
fn edge_label(connection: &Connection) -> Option<&str> {
    connection
        .label
        .as_deref()
        .or(connection.condition.as_deref())
        .filter(|l| !l.is_empty())
}

/// Mermaid ids must be plain identifiers, and `end` is a keyword
fn mermaid_id(id: &str) -> String {
    let mut safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if safe.eq_ignore_ascii_case("end") {
        safe.push('_');
    }
    safe
}

fn mermaid_text(text: &str) -> String {
    text.replace('"', "#quot;").replace('|', "#124;")
}

fn mermaid_node(node: &Node) -> String {
    let id = mermaid_id(&node.id);
    let text = format!("{} {}", icon(node.node_type), mermaid_text(&node.name));
    match node.node_type {
        NodeType::Start | NodeType::End => format!("{}([\"{}\"])", id, text),
        NodeType::ConditionalAgent => format!("{}{{\"{}\"}}", id, text),
        NodeType::ParallelAgent => format!("{}[[\"{}\"]]", id, text),
        NodeType::CheckpointAgent => format!("{}[(\"{}\")]", id, text),
        _ => format!("{}[\"{}\"]", id, text),
    }
}

pub fn to_mermaid(workflow: &WorkflowDefinition) -> String {
    let mut out = String::from("graph TD\n");

    for node in &workflow.nodes {
        let _ = writeln!(out, "    {}", mermaid_node(node));
    }

    for connection in &workflow.connections {
        let from = mermaid_id(&connection.source);
        let to = mermaid_id(&connection.target);
        let arrow = match connection.kind {
            ConnectionKind::ControlFlow => "-.->",
            ConnectionKind::DataFlow | ConnectionKind::Conditional => "-->",
        };
        match edge_label(connection) {
            Some(label) => {
                let _ = writeln!(out, "    {} {}|{}| {}", from, arrow, mermaid_text(label), to);
            }
            None => {
                let _ = writeln!(out, "    {} {} {}", from, arrow, to);
            }
        }
    }

    out.push('\n');
    out.push_str("    %% Styling\n");
    for (class, fill) in [
        ("startNode", "#90EE90"),
        ("endNode", "#FFB6C1"),
        ("agentNode", "#87CEEB"),
        ("functionNode", "#FFE4B5"),
        ("conditionNode", "#DDA0DD"),
        ("parallelNode", "#F0E68C"),
        ("checkpointNode", "#B0C4DE"),
    ] {
        let _ = writeln!(out, "    classDef {} fill:{},stroke:#333,stroke-width:2px", class, fill);
    }
    for node in &workflow.nodes {
        let _ = writeln!(out, "    class {} {}", mermaid_id(&node.id), category(node.node_type));
    }

    out
}

fn dot_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn dot_fill(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Start => "lightgreen",
        NodeType::End => "lightcoral",
        NodeType::Function => "lightyellow",
        NodeType::ConditionalAgent => "plum",
        NodeType::ParallelAgent => "khaki",
        NodeType::CheckpointAgent => "lightsteelblue",
        NodeType::LlmAgent | NodeType::ToolAgent | NodeType::McpAgent => "lightblue",
    }
}

pub fn to_dot(workflow: &WorkflowDefinition) -> String {
    let mut out = String::from("digraph Workflow {\n");
    out.push_str("    rankdir=LR;\n");
    out.push_str("    node [shape=box, style=rounded];\n\n");

    for node in &workflow.nodes {
        let shape = match node.node_type {
            NodeType::ConditionalAgent => ", shape=diamond",
            _ => "",
        };
        let _ = writeln!(
            out,
            "    \"{}\" [label=\"{}\", fillcolor={}, style=\"filled,rounded\"{}];",
            dot_text(&node.id),
            dot_text(&node.name),
            dot_fill(node.node_type),
            shape
        );
    }
    out.push('\n');

    for connection in &workflow.connections {
        let mut attrs = Vec::new();
        if let Some(label) = edge_label(connection) {
            attrs.push(format!("label=\"{}\"", dot_text(label)));
        }
        if connection.kind == ConnectionKind::ControlFlow {
            attrs.push("style=dashed".to_string());
        }
        let attrs = if attrs.is_empty() {
            String::new()
        } else {
            format!(" [{}]", attrs.join(", "))
        };
        let _ = writeln!(
            out,
            "    \"{}\" -> \"{}\"{};",
            dot_text(&connection.source),
            dot_text(&connection.target),
            attrs
        );
    }

    out.push_str("}\n");
    out
}
