//! Workflow run → DAG.
//!
//! Only pod-like nodes are drawn. Container nodes are scheduling structure:
//! edges into them are followed through to the next drawable node, so
//! `A → Container(B) → C` becomes `A → C`.

use std::collections::BTreeMap;

use flowdash_core::duration::parse_timestamp;
use flowdash_core::workflow::{NodeType, Workflow, WorkflowStatusNode};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    EdgeLabeler, FlowGraph, FlowNode, GraphError, NodePayload, NODE_WIDTH, TRIGGER_NODE_NAME,
    WORKFLOW_NODE_HEIGHT,
};

type Destinations<'a> = SmallVec<[&'a str; 4]>;

/// Drawable nodes, earliest start first. Unstarted nodes go last; ties break
/// on node id.
pub fn graph_nodes(workflow: &Workflow) -> Vec<&WorkflowStatusNode> {
    let mut nodes: Vec<_> = workflow.nodes().filter(|n| n.is_graph_node()).collect();
    nodes.sort_by_cached_key(|n| {
        let started = n.started_at.as_deref().and_then(|s| parse_timestamp(s).ok());
        (started.is_none(), started, n.id.clone())
    });
    nodes
}

/// Drawable nodes reached from `node`'s children, looking through containers.
/// Each destination appears once even when several containers lead to it.
fn edge_destinations<'a>(
    workflow: &str,
    node: &'a WorkflowStatusNode,
    all: &'a BTreeMap<String, WorkflowStatusNode>,
) -> Result<Destinations<'a>, GraphError> {
    let mut out = Destinations::new();
    // containers on the current path, and containers already expanded
    let mut on_path: FxHashSet<&'a str> = FxHashSet::default();
    let mut expanded: FxHashSet<&'a str> = FxHashSet::default();
    // (id, leaving): a `true` entry pops a container off the current path
    let mut stack: Vec<(&'a str, bool)> = node.children().iter().map(|c| (c.as_str(), false)).collect();
    while let Some((child_id, leaving)) = stack.pop() {
        if leaving {
            on_path.remove(child_id);
            continue;
        }
        let child = all
            .get(child_id)
            .ok_or_else(|| GraphError::workflow(workflow, format!("missing node {}", child_id)))?;
        match child.node_type {
            NodeType::Pod | NodeType::Skipped => {
                // the exit handler is never drawn, so neither are edges into it
                if child.is_graph_node() && !out.contains(&child_id) {
                    out.push(child_id);
                }
            }
            NodeType::Container => {
                if on_path.contains(child_id) {
                    return Err(GraphError::workflow(workflow, format!("container cycle at {}", child_id)));
                }
                if !expanded.insert(child_id) {
                    continue;
                }
                on_path.insert(child_id);
                stack.push((child_id, true));
                stack.extend(child.children().iter().map(|c| (c.as_str(), false)));
            }
            NodeType::Dag => {
                return Err(GraphError::workflow(workflow, format!("unexpected DAG node edge {}", child_id)));
            }
            NodeType::Unrecognized => {
                return Err(GraphError::workflow(workflow, format!("unexpected node type for {}", child_id)));
            }
        }
    }
    Ok(out)
}

/// Build the run graph. Every drawable node nobody points at gets an edge from
/// the `github-check-start` node, so the trigger ends up as the single root.
pub fn workflow_graph(workflow: &Workflow) -> Result<FlowGraph, GraphError> {
    let name = workflow.metadata.name.as_str();
    let Some(all) = workflow.status.nodes.as_ref() else {
        return Err(GraphError::NoNodes { workflow: name.to_string() });
    };
    let visible = graph_nodes(workflow);

    let nodes = visible
        .iter()
        .map(|n| FlowNode {
            label: n.id.clone(),
            width: NODE_WIDTH,
            height: WORKFLOW_NODE_HEIGHT,
            payload: NodePayload::WorkflowNode {
                id: n.id.clone(),
                display_name: n.display_name.clone(),
                phase: n.phase,
                node_type: n.node_type,
                started_at: n.started_at.clone(),
            },
        })
        .collect();

    let mut labeler = EdgeLabeler::default();
    let mut edges = Vec::new();
    let mut reached: FxHashSet<&str> = FxHashSet::default();
    for node in &visible {
        for dest in edge_destinations(name, node, all)? {
            reached.insert(dest);
            edges.push(labeler.edge(&node.id, dest));
        }
    }

    let trigger = visible
        .iter()
        .find(|n| n.display_name == TRIGGER_NODE_NAME)
        .ok_or_else(|| GraphError::workflow(name, format!("missing trigger node {}", TRIGGER_NODE_NAME)))?;
    for node in &visible {
        if node.id != trigger.id && !reached.contains(node.id.as_str()) {
            edges.push(labeler.edge(&trigger.id, &node.id));
        }
    }

    debug!(workflow = %name, nodes = visible.len(), edges = edges.len(), "built workflow graph");
    Ok(FlowGraph { nodes, edges })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf(nodes: serde_json::Value) -> Workflow {
        serde_json::from_value(serde_json::json!({
            "metadata": { "name": "wf-1", "namespace": "ci" },
            "status": { "phase": "Running", "nodes": nodes }
        }))
        .unwrap()
    }

    #[test]
    fn containers_collapse_into_direct_edges() {
        let w = wf(serde_json::json!({
            "wf-1": { "id": "wf-1", "displayName": "wf-1", "type": "DAG", "children": ["t"] },
            "t": { "id": "t", "displayName": "github-check-start", "type": "Pod",
                   "startedAt": "2024-05-01T10:00:00Z", "children": ["a"] },
            "a": { "id": "a", "displayName": "build", "type": "Pod",
                   "startedAt": "2024-05-01T10:00:01Z", "children": ["b"] },
            "b": { "id": "b", "displayName": "build.main", "type": "Container", "children": ["c"] },
            "c": { "id": "c", "displayName": "deploy", "type": "Pod", "startedAt": "2024-05-01T10:00:02Z" }
        }));
        let g = workflow_graph(&w).unwrap();
        let labels: Vec<_> = g.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, ["t", "a", "c"]);
        assert_eq!(g.edge_pairs(), [("t", "a"), ("a", "c")]);
        assert!(g.nodes.iter().all(|n| n.height == WORKFLOW_NODE_HEIGHT));
    }

    #[test]
    fn unreached_nodes_hang_off_the_trigger() {
        let w = wf(serde_json::json!({
            "t": { "id": "t", "displayName": "github-check-start", "type": "Pod", "startedAt": "2024-05-01T10:00:00Z" },
            "x": { "id": "x", "displayName": "lint", "type": "Pod", "startedAt": "2024-05-01T10:00:03Z" },
            "y": { "id": "y", "displayName": "test", "type": "Skipped", "startedAt": "2024-05-01T10:00:02Z", "children": ["x"] }
        }));
        let g = workflow_graph(&w).unwrap();
        assert_eq!(g.edge_pairs(), [("y", "x"), ("t", "y")]);
        assert_eq!(g.edges[1].label, "e2");
        assert!(g.edges.iter().all(|e| e.v != e.w), "no self edge");
    }

    #[test]
    fn missing_trigger_is_an_error() {
        let w = wf(serde_json::json!({
            "a": { "id": "a", "displayName": "build", "type": "Pod" }
        }));
        assert!(matches!(workflow_graph(&w), Err(GraphError::WorkflowGraph { .. })));
    }

    #[test]
    fn dag_child_and_missing_child_are_errors() {
        let dag = wf(serde_json::json!({
            "t": { "id": "t", "displayName": "github-check-start", "type": "Pod", "children": ["d"] },
            "d": { "id": "d", "displayName": "inner", "type": "DAG" }
        }));
        let err = workflow_graph(&dag).unwrap_err();
        assert!(err.to_string().contains("unexpected DAG"), "err={}", err);

        let missing = wf(serde_json::json!({
            "t": { "id": "t", "displayName": "github-check-start", "type": "Pod", "children": ["ghost"] }
        }));
        let err = workflow_graph(&missing).unwrap_err();
        assert!(err.to_string().contains("missing node ghost"), "err={}", err);
    }

    #[test]
    fn exit_handler_is_hidden_and_unstarted_nodes_sort_last() {
        let w = wf(serde_json::json!({
            "t": { "id": "t", "displayName": "github-check-start", "type": "Pod",
                   "startedAt": "2024-05-01T10:00:00Z", "children": ["e"] },
            "e": { "id": "e", "displayName": "wf-1.onExit", "type": "Pod", "startedAt": "2024-05-01T10:00:05Z" },
            "p": { "id": "p", "displayName": "publish", "type": "Pod" }
        }));
        let g = workflow_graph(&w).unwrap();
        let labels: Vec<_> = g.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, ["t", "p"]);
        assert_eq!(g.edge_pairs(), [("t", "p")]);
    }

    #[test]
    fn container_cycle_is_an_error() {
        let w = wf(serde_json::json!({
            "t": { "id": "t", "displayName": "github-check-start", "type": "Pod", "children": ["c1"] },
            "c1": { "id": "c1", "displayName": "a.main", "type": "Container", "children": ["c2"] },
            "c2": { "id": "c2", "displayName": "b.main", "type": "Container", "children": ["c1"] }
        }));
        let err = workflow_graph(&w).unwrap_err();
        assert!(err.to_string().contains("container cycle at c1"), "err={}", err);
    }

    #[test]
    fn diamond_through_containers_yields_one_edge() {
        let w = wf(serde_json::json!({
            "t": { "id": "t", "displayName": "github-check-start", "type": "Pod",
                   "startedAt": "2024-05-01T10:00:00Z", "children": ["c1", "c2"] },
            "c1": { "id": "c1", "displayName": "a.main", "type": "Container", "children": ["c3", "p"] },
            "c2": { "id": "c2", "displayName": "b.main", "type": "Container", "children": ["c3", "p"] },
            "c3": { "id": "c3", "displayName": "c.main", "type": "Container", "children": ["p"] },
            "p": { "id": "p", "displayName": "publish", "type": "Pod", "startedAt": "2024-05-01T10:00:01Z" }
        }));
        let g = workflow_graph(&w).unwrap();
        assert_eq!(g.edge_pairs(), [("t", "p")]);
        assert_eq!(g.edges[0].label, "e1");
    }

    #[test]
    fn no_status_nodes() {
        let w: Workflow = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "wf-0" }, "status": { "phase": "Pending" }
        }))
        .unwrap();
        assert!(matches!(workflow_graph(&w), Err(GraphError::NoNodes { workflow }) if workflow == "wf-0"));
    }
}
