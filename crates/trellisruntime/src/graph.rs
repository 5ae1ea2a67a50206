//! Graph preparation for a run.
//!
//! A run executes only what its triggers can reach: [`prune`] drops
//! disconnected islands, [`topological_sort`] linearizes the rest, and
//! [`build_parents`] / [`resolve_input`] decide what each node sees.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use trelliscore::{Connection, Context, NodeId, NodeSpec, OutputMap, Workflow, WorkflowError};

/// Child node id to its parents, in connection order
pub type ParentMap = HashMap<NodeId, Vec<NodeId>>;

/// Ids forward-reachable from any trigger, triggers included.
pub fn reachable(trigger_ids: &HashSet<NodeId>, connections: &[Connection]) -> HashSet<NodeId> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in connections {
        adjacency
            .entry(conn.from_node_id.as_str())
            .or_default()
            .push(conn.to_node_id.as_str());
    }

    let mut seen: HashSet<NodeId> = trigger_ids.clone();
    let mut queue: VecDeque<&str> = trigger_ids.iter().map(|id| id.as_str()).collect();

    while let Some(node_id) = queue.pop_front() {
        for &next in adjacency.get(node_id).into_iter().flatten() {
            if seen.insert(next.to_string()) {
                queue.push_back(next);
            }
        }
    }

    seen
}

/// The part of a workflow a run actually executes
#[derive(Debug, Clone, PartialEq)]
pub struct PrunedGraph {
    pub nodes: Vec<NodeSpec>,
    pub connections: Vec<Connection>,
}

/// Keep reachable nodes and the connections between them, in workflow order.
pub fn prune(workflow: &Workflow, trigger_ids: &HashSet<NodeId>) -> PrunedGraph {
    let keep = reachable(trigger_ids, &workflow.connections);

    let nodes = workflow
        .nodes
        .iter()
        .filter(|n| keep.contains(&n.id))
        .cloned()
        .collect();
    let connections = workflow
        .connections
        .iter()
        .filter(|c| keep.contains(&c.from_node_id) && keep.contains(&c.to_node_id))
        .cloned()
        .collect();

    PrunedGraph { nodes, connections }
}

/// Order `nodes` so every node follows all of its upstream nodes.
///
/// Duplicate connections collapse into one edge. The same input always yields
/// the same order.
///
/// # Errors
/// - [`WorkflowError::NodeNotFound`] if a connection names a node outside `nodes`.
/// - [`WorkflowError::CyclicDependency`] if the connections contain a cycle.
pub fn topological_sort(
    nodes: &[NodeSpec],
    connections: &[Connection],
) -> Result<Vec<NodeSpec>, WorkflowError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), connections.len());
    let mut node_to_index: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());

    for (position, node) in nodes.iter().enumerate() {
        let idx = graph.add_node(position);
        node_to_index.insert(node.id.as_str(), idx);
    }

    for conn in connections {
        let from_idx = node_to_index
            .get(conn.from_node_id.as_str())
            .ok_or_else(|| WorkflowError::NodeNotFound(conn.from_node_id.clone()))?;
        let to_idx = node_to_index
            .get(conn.to_node_id.as_str())
            .ok_or_else(|| WorkflowError::NodeNotFound(conn.to_node_id.clone()))?;

        graph.update_edge(*from_idx, *to_idx, ());
    }

    let order = toposort(&graph, None).map_err(|cycle| WorkflowError::CyclicDependency {
        node_id: nodes[graph[cycle.node_id()]].id.clone(),
    })?;

    Ok(order.into_iter().map(|idx| nodes[graph[idx]].clone()).collect())
}

/// Invert connections into child -> parents.
pub fn build_parents(connections: &[Connection]) -> ParentMap {
    let mut parents = ParentMap::new();
    for conn in connections {
        let entry = parents.entry(conn.to_node_id.clone()).or_default();
        if !entry.contains(&conn.from_node_id) {
            entry.push(conn.from_node_id.clone());
        }
    }
    parents
}

/// Input context for the node about to execute.
///
/// Triggers get the initial payload verbatim. Every other node gets its
/// parents' outputs shallow-merged in parent order; on a key collision the
/// later parent wins. Parents without a recorded output contribute nothing.
pub fn resolve_input(
    node_id: &str,
    parents: &ParentMap,
    outputs: &OutputMap,
    trigger_ids: &HashSet<NodeId>,
    initial_data: &Context,
) -> Context {
    if trigger_ids.contains(node_id) {
        return initial_data.clone();
    }

    let mut context = Context::new();
    for parent in parents.get(node_id).into_iter().flatten() {
        if let Some(output) = outputs.get(parent) {
            for (key, value) in output {
                context.insert(key.clone(), value.clone());
            }
        }
    }
    context
}
