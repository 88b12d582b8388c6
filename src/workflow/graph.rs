//! Petgraph view of a workflow definition
//!
//! Builds a directed graph from a workflow snapshot, checking the structural
//! rules the engine relies on: exactly one Start node, no dangling or
//! duplicate references, and no cycles.

use crate::error::EngineError;
use crate::workflow::types::{Connection, Node, NodeType, WorkflowDefinition};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Edge weight: the connection plus its declaration position.
///
/// The ordinal drives the merge order at fan-in nodes so the result never
/// depends on which predecessor finished first.
#[derive(Debug, Clone)]
pub struct Link {
    pub ordinal: usize,
    pub connection: Connection,
}

/// Validated, acyclic graph of a single workflow snapshot
#[derive(Debug)]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Link>,
    node_id_to_index: HashMap<String, NodeIndex>,
    start: NodeIndex,
    topo_order: Vec<NodeIndex>,
}

impl WorkflowGraph {
    /// Build the graph, reporting every structural issue at once
    pub fn build(workflow: &WorkflowDefinition) -> Result<Self, EngineError> {
        tracing::debug!(
            "🏗️ Building workflow graph for '{}' ({} nodes, {} connections)",
            workflow.id,
            workflow.nodes.len(),
            workflow.connections.len()
        );

        let mut issues = Vec::new();
        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in &workflow.nodes {
            if node_id_to_index.contains_key(&node.id) {
                issues.push(format!("duplicate node id '{}'", node.id));
                continue;
            }
            let index = graph.add_node(node.clone());
            node_id_to_index.insert(node.id.clone(), index);
        }

        let mut seen_connections = HashSet::new();
        for (ordinal, connection) in workflow.connections.iter().enumerate() {
            if !seen_connections.insert(connection.id.as_str()) {
                issues.push(format!("duplicate connection id '{}'", connection.id));
            }
            let from = node_id_to_index.get(&connection.source);
            let to = node_id_to_index.get(&connection.target);
            match (from, to) {
                (Some(&from), Some(&to)) => {
                    graph.add_edge(
                        from,
                        to,
                        Link {
                            ordinal,
                            connection: connection.clone(),
                        },
                    );
                }
                _ => {
                    for (end, id) in [("source", &connection.source), ("target", &connection.target)] {
                        if !node_id_to_index.contains_key(id) {
                            issues.push(format!(
                                "connection '{}' references unknown {} node '{}'",
                                connection.id, end, id
                            ));
                        }
                    }
                }
            }
        }

        let starts: Vec<&Node> = workflow.start_nodes();
        match starts.len() {
            0 => issues.push("workflow has no Start node".to_string()),
            1 => {}
            n => issues.push(format!(
                "workflow has {} Start nodes ({}), exactly one is required",
                n,
                starts.iter().map(|n| n.id.as_str()).collect::<Vec<_>>().join(", ")
            )),
        }

        if !issues.is_empty() {
            tracing::error!("❌ Workflow '{}' has {} structural issue(s)", workflow.id, issues.len());
            return Err(EngineError::GraphStructure { issues });
        }

        let cyclic = cyclic_nodes(&graph);
        if !cyclic.is_empty() {
            let mut nodes: Vec<String> = cyclic.iter().map(|&i| graph[i].id.clone()).collect();
            nodes.sort_by_key(|id| workflow.nodes.iter().position(|n| &n.id == id));
            tracing::error!("❌ Workflow '{}' contains a cycle: {:?}", workflow.id, nodes);
            return Err(EngineError::CycleDetected { nodes });
        }

        let topo_order = toposort(&graph, None).map_err(|cycle| EngineError::CycleDetected {
            nodes: vec![graph[cycle.node_id()].id.clone()],
        })?;

        let start = node_id_to_index[&starts[0].id];
        tracing::debug!("✅ Graph for '{}' is a DAG rooted at '{}'", workflow.id, graph[start].id);

        Ok(Self {
            graph,
            node_id_to_index,
            start,
            topo_order,
        })
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.graph[index]
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.node_id_to_index.get(node_id).copied()
    }

    pub fn start(&self) -> NodeIndex {
        self.start
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Nodes in topological order
    pub fn topological_order(&self) -> &[NodeIndex] {
        &self.topo_order
    }

    /// Incoming links in connection declaration order
    pub fn incoming(&self, index: NodeIndex) -> Vec<(NodeIndex, &Link)> {
        self.links(index, Direction::Incoming)
    }

    /// Outgoing links in connection declaration order
    pub fn outgoing(&self, index: NodeIndex) -> Vec<(NodeIndex, &Link)> {
        self.links(index, Direction::Outgoing)
    }

    fn links(&self, index: NodeIndex, direction: Direction) -> Vec<(NodeIndex, &Link)> {
        let mut links: Vec<(NodeIndex, &Link)> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                (other, edge.weight())
            })
            .collect();
        links.sort_by_key(|(_, link)| link.ordinal);
        links
    }

    /// Nodes that only exist to feed `checkpoint`
    ///
    /// A node qualifies when every outgoing link leads to the checkpoint or
    /// to another such node. Their work is captured by the checkpoint's
    /// snapshot; every other node has to run again on resume.
    pub fn upstream_only(&self, checkpoint: NodeIndex) -> HashSet<NodeIndex> {
        let mut upstream = HashSet::new();
        for &index in self.topo_order.iter().rev() {
            if index == checkpoint {
                continue;
            }
            let mut targets = self.graph.neighbors_directed(index, Direction::Outgoing).peekable();
            if targets.peek().is_none() {
                continue;
            }
            if targets.all(|target| target == checkpoint || upstream.contains(&target)) {
                upstream.insert(index);
            }
        }
        upstream
    }

    /// Nodes whose failures are tolerated because they sit inside a
    /// best-effort parallel fan-out
    ///
    /// A node is tolerant when it has exactly one incoming link and that
    /// predecessor is either a best-effort ParallelAgent or tolerant itself.
    /// Fan-in nodes close the region, so nothing after a join is tolerant.
    pub fn best_effort_nodes(&self) -> HashSet<NodeIndex> {
        let mut tolerant = HashSet::new();
        for &index in &self.topo_order {
            let preds = self.incoming(index);
            let [(pred, _)] = preds.as_slice() else {
                continue;
            };
            if tolerant.contains(pred) || is_best_effort_fan_out(&self.graph[*pred]) {
                tolerant.insert(index);
            }
        }
        tolerant
    }

    /// The ParallelAgent whose branch `index` belongs to
    ///
    /// Walks single-predecessor links upwards; a fan-in ends the branch.
    pub fn branch_owner(&self, index: NodeIndex) -> Option<NodeIndex> {
        let mut current = index;
        loop {
            let preds = self.incoming(current);
            let [(pred, _)] = preds.as_slice() else {
                return None;
            };
            if self.graph[*pred].node_type == NodeType::ParallelAgent {
                return Some(*pred);
            }
            current = *pred;
        }
    }
}

/// Parallel failure policy declared on a ParallelAgent node
pub fn is_best_effort_fan_out(node: &Node) -> bool {
    node.node_type == NodeType::ParallelAgent
        && node
            .property_str("failure_policy")
            .is_some_and(|p| p.eq_ignore_ascii_case("best_effort"))
}

/// Nodes that belong to a strongly connected component of size > 1 or
/// carry a self-loop
fn cyclic_nodes(graph: &DiGraph<Node, Link>) -> Vec<NodeIndex> {
    let mut nodes = Vec::new();
    for component in tarjan_scc(graph) {
        if component.len() > 1 || graph.contains_edge(component[0], component[0]) {
            nodes.extend(component);
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Connection, Node, NodeType, WorkflowDefinition};

    fn chain() -> WorkflowDefinition {
        WorkflowDefinition::new("chain", "tester")
            .with_node(Node::simple("start", "Start", NodeType::Start))
            .with_node(Node::simple("f", "Transform", NodeType::Function))
            .with_node(Node::simple("end", "End", NodeType::End))
            .with_connection(Connection::data("start", "f"))
            .with_connection(Connection::data("f", "end"))
    }

    #[test]
    fn test_build_chain() {
        let graph = WorkflowGraph::build(&chain()).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.node(graph.start()).id, "start");
        let order: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|&i| graph.node(i).id.as_str())
            .collect();
        assert_eq!(order, vec!["start", "f", "end"]);
    }

    #[test]
    fn test_dangling_and_missing_start_reported_together() {
        let wf = WorkflowDefinition::new("broken", "tester")
            .with_node(Node::simple("f", "Transform", NodeType::Function))
            .with_connection(Connection::data("f", "ghost"));
        match WorkflowGraph::build(&wf) {
            Err(EngineError::GraphStructure { issues }) => {
                assert_eq!(issues.len(), 2);
                assert!(issues.iter().any(|i| i.contains("ghost")));
                assert!(issues.iter().any(|i| i.contains("no Start node")));
            }
            other => panic!("expected GraphStructure, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_names_nodes() {
        let wf = chain()
            .with_node(Node::simple("g", "Loop", NodeType::Function))
            .with_connection(Connection::data("f", "g"))
            .with_connection(Connection::data("g", "f"));
        match WorkflowGraph::build(&wf) {
            Err(EngineError::CycleDetected { nodes }) => assert_eq!(nodes, vec!["f", "g"]),
            other => panic!("expected CycleDetected, got {:?}", other),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let wf = chain().with_connection(Connection::data("f", "f"));
        assert!(matches!(
            WorkflowGraph::build(&wf),
            Err(EngineError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_incoming_follows_declaration_order() {
        let wf = WorkflowDefinition::new("fan-in", "tester")
            .with_node(Node::simple("start", "Start", NodeType::Start))
            .with_node(Node::simple("a", "A", NodeType::Function))
            .with_node(Node::simple("b", "B", NodeType::Function))
            .with_node(Node::simple("end", "End", NodeType::End))
            .with_connection(Connection::data("start", "a"))
            .with_connection(Connection::data("start", "b"))
            .with_connection(Connection::data("b", "end"))
            .with_connection(Connection::data("a", "end"));
        let graph = WorkflowGraph::build(&wf).unwrap();
        let end = graph.index_of("end").unwrap();
        let preds: Vec<&str> = graph
            .incoming(end)
            .iter()
            .map(|(i, _)| graph.node(*i).id.as_str())
            .collect();
        assert_eq!(preds, vec!["b", "a"]);
    }

    #[test]
    fn test_best_effort_region() {
        let wf = WorkflowDefinition::new("fan-out", "tester")
            .with_node(Node::simple("start", "Start", NodeType::Start))
            .with_node(
                Node::new("par", "Parallel", NodeType::ParallelAgent)
                    .with_property("failure_policy", "best_effort"),
            )
            .with_node(Node::simple("a", "A", NodeType::Function))
            .with_node(Node::simple("b", "B", NodeType::Function))
            .with_node(Node::simple("end", "End", NodeType::End))
            .with_connection(Connection::data("start", "par"))
            .with_connection(Connection::data("par", "a"))
            .with_connection(Connection::data("par", "b"))
            .with_connection(Connection::data("a", "end"))
            .with_connection(Connection::data("b", "end"));
        let graph = WorkflowGraph::build(&wf).unwrap();
        let tolerant = graph.best_effort_nodes();
        let ids: HashSet<&str> = tolerant.iter().map(|&i| graph.node(i).id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["a", "b"]));
    }

    #[test]
    fn test_best_effort_region_closes_at_the_join() {
        let wf = WorkflowDefinition::new("fan-out", "tester")
            .with_node(Node::simple("start", "Start", NodeType::Start))
            .with_node(
                Node::new("par", "Parallel", NodeType::ParallelAgent)
                    .with_property("failure_policy", "best_effort"),
            )
            .with_node(Node::simple("a", "A", NodeType::Function))
            .with_node(Node::simple("a2", "A2", NodeType::Function))
            .with_node(Node::simple("b", "B", NodeType::Function))
            .with_node(Node::simple("join", "Join", NodeType::Function))
            .with_node(Node::simple("after", "After", NodeType::Function))
            .with_node(Node::simple("end", "End", NodeType::End))
            .with_connection(Connection::data("start", "par"))
            .with_connection(Connection::data("par", "a"))
            .with_connection(Connection::data("a", "a2"))
            .with_connection(Connection::data("par", "b"))
            .with_connection(Connection::data("a2", "join"))
            .with_connection(Connection::data("b", "join"))
            .with_connection(Connection::data("join", "after"))
            .with_connection(Connection::data("after", "end"));
        let graph = WorkflowGraph::build(&wf).unwrap();
        let tolerant = graph.best_effort_nodes();
        let ids: HashSet<&str> = tolerant.iter().map(|&i| graph.node(i).id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["a", "a2", "b"]));

        let owner = |id: &str| {
            graph
                .branch_owner(graph.index_of(id).unwrap())
                .map(|i| graph.node(i).id.clone())
        };
        assert_eq!(owner("a2").as_deref(), Some("par"));
        assert_eq!(owner("join"), None);
        assert_eq!(owner("after"), None);
    }

    #[test]
    fn test_upstream_only_keeps_side_branches() {
        let wf = WorkflowDefinition::new("side", "tester")
            .with_node(Node::simple("start", "Start", NodeType::Start))
            .with_node(Node::simple("prep", "Prep", NodeType::Function))
            .with_node(Node::simple("cp", "Save", NodeType::CheckpointAgent))
            .with_node(Node::simple("a", "A", NodeType::Function))
            .with_node(Node::simple("side", "Side", NodeType::Function))
            .with_node(Node::simple("end", "End", NodeType::End))
            .with_connection(Connection::data("start", "prep"))
            .with_connection(Connection::data("prep", "cp"))
            .with_connection(Connection::data("cp", "a"))
            .with_connection(Connection::data("start", "side"))
            .with_connection(Connection::data("a", "end"))
            .with_connection(Connection::data("side", "end"));
        let graph = WorkflowGraph::build(&wf).unwrap();
        let upstream = graph.upstream_only(graph.index_of("cp").unwrap());
        let ids: HashSet<&str> = upstream.iter().map(|&i| graph.node(i).id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["prep"]));

        let chain = WorkflowGraph::build(&chain()).unwrap();
        let upstream = chain.upstream_only(chain.index_of("f").unwrap());
        assert_eq!(upstream, HashSet::from([chain.start()]));
    }
}
