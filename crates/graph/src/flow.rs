//! Flow definition → DAG.

use flowdash_core::flow::{Flow, Step, StepSource};
use flowdash_core::memo::resolve_trigger;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::{
    EdgeLabeler, FlowGraph, FlowNode, GraphError, NodePayload, ARGO_NODE_HEIGHT, DOCKER_NODE_HEIGHT,
    NODE_WIDTH, TRIGGER_NODE_HEIGHT,
};

pub fn step_height(source: StepSource) -> f64 {
    match source {
        StepSource::DockerBuildTest | StepSource::DockerBuildTestPublish => DOCKER_NODE_HEIGHT,
        StepSource::ArgoCd => ARGO_NODE_HEIGHT,
    }
}

/// Trigger node first, then one node per step in declaration order. Steps
/// without dependencies hang off the trigger; the rest get one edge per
/// dependency. Cycles are left for the layout engine to deal with.
pub fn flow_graph(flow: &Flow) -> Result<FlowGraph, GraphError> {
    let trigger = resolve_trigger(flow)?;
    let trigger_label = trigger.display_name();

    let mut nodes = Vec::with_capacity(flow.spec.steps.len() + 1);
    nodes.push(FlowNode {
        label: trigger_label.to_string(),
        width: NODE_WIDTH,
        height: TRIGGER_NODE_HEIGHT,
        payload: NodePayload::Trigger(trigger.clone()),
    });

    let mut labels: FxHashSet<&str> = FxHashSet::default();
    labels.insert(trigger_label);
    for step in &flow.spec.steps {
        let label = step.display_name();
        if !labels.insert(label) {
            return Err(GraphError::DuplicateNode { label: label.to_string() });
        }
        nodes.push(FlowNode {
            label: label.to_string(),
            width: NODE_WIDTH,
            height: step_height(step.source()),
            payload: NodePayload::Step(step.clone()),
        });
    }

    let mut labeler = EdgeLabeler::default();
    let mut edges = Vec::new();
    for step in &flow.spec.steps {
        let label = step.display_name();
        match step.depends_on() {
            [] => edges.push(labeler.edge(trigger_label, label)),
            deps => {
                for dep in deps {
                    check_dependency(&labels, step, dep)?;
                    edges.push(labeler.edge(dep, label));
                }
            }
        }
    }

    debug!(flow = %flow.metadata.name, nodes = nodes.len(), edges = edges.len(), "built flow graph");
    Ok(FlowGraph { nodes, edges })
}

fn check_dependency(labels: &FxHashSet<&str>, step: &Step, dep: &str) -> Result<(), GraphError> {
    if labels.contains(dep) {
        Ok(())
    } else {
        Err(GraphError::UnknownDependency { step: step.display_name().to_string(), dependency: dep.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(spec: serde_json::Value) -> Flow {
        serde_json::from_value(serde_json::json!({
            "metadata": { "name": "web-push", "namespace": "ci" },
            "spec": spec
        }))
        .unwrap()
    }

    fn push_trigger() -> serde_json::Value {
        serde_json::json!({ "triggerSource": "GitHubPush", "repoUrl": "https://github.com/acme/web.git" })
    }

    #[test]
    fn push_flow_with_chained_steps() {
        let f = flow(serde_json::json!({
            "triggers": [push_trigger()],
            "steps": [
                { "stepSource": "DockerBuildTestPublish", "stepName": "S1" },
                { "stepSource": "ArgoCD", "stepName": "S2", "repoUrl": "https://github.com/acme/deploy",
                  "repoPath": "web", "dependsOn": ["S1"] }
            ]
        }));
        let g = flow_graph(&f).unwrap();
        let labels: Vec<_> = g.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, ["GitHubPush", "S1", "S2"]);
        assert_eq!(g.nodes[0].height, TRIGGER_NODE_HEIGHT);
        assert_eq!(g.nodes[1].height, DOCKER_NODE_HEIGHT);
        assert_eq!(g.nodes[2].height, ARGO_NODE_HEIGHT);
        assert!(g.nodes.iter().all(|n| n.width == NODE_WIDTH));
        assert_eq!(g.edge_pairs(), [("GitHubPush", "S1"), ("S1", "S2")]);
        assert_eq!(g.edge("e1").map(|e| e.w.as_str()), Some("S1"));
        assert_eq!(g.edge("e2").map(|e| e.w.as_str()), Some("S2"));
    }

    #[test]
    fn wrong_trigger_count_fails_before_any_node() {
        for triggers in [serde_json::json!([]), serde_json::json!([push_trigger(), push_trigger()])] {
            let f = flow(serde_json::json!({ "triggers": triggers, "steps": [ { "stepSource": "DockerBuildTest" } ] }));
            assert!(matches!(flow_graph(&f), Err(GraphError::MalformedFlow(_))));
        }
    }

    #[test]
    fn fan_in_produces_one_edge_per_dependency() {
        let f = flow(serde_json::json!({
            "triggers": [ { "triggerSource": "GitHubPullRequest", "triggerName": "pr", "repoUrl": "https://github.com/a/b" } ],
            "steps": [
                { "stepSource": "DockerBuildTest", "stepName": "api" },
                { "stepSource": "DockerBuildTest", "stepName": "web" },
                { "stepSource": "DockerBuildTestPublish", "stepName": "bundle", "dependsOn": ["api", "web"] }
            ]
        }));
        let g = flow_graph(&f).unwrap();
        assert_eq!(g.edge_pairs(), [("pr", "api"), ("pr", "web"), ("api", "bundle"), ("web", "bundle")]);
        let labels: Vec<_> = g.edges.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["e1", "e2", "e3", "e4"]);
    }

    #[test]
    fn duplicate_and_unknown_names_are_rejected() {
        let dup = flow(serde_json::json!({
            "triggers": [push_trigger()],
            "steps": [ { "stepSource": "DockerBuildTest" }, { "stepSource": "DockerBuildTest" } ]
        }));
        assert!(matches!(flow_graph(&dup), Err(GraphError::DuplicateNode { label }) if label == "DockerBuildTest"));

        let unknown = flow(serde_json::json!({
            "triggers": [push_trigger()],
            "steps": [ { "stepSource": "DockerBuildTest", "dependsOn": ["ghost"] } ]
        }));
        assert!(matches!(flow_graph(&unknown), Err(GraphError::UnknownDependency { dependency, .. }) if dependency == "ghost"));
    }

    #[test]
    fn cycles_pass_through() {
        let f = flow(serde_json::json!({
            "triggers": [push_trigger()],
            "steps": [
                { "stepSource": "DockerBuildTest", "stepName": "a", "dependsOn": ["b"] },
                { "stepSource": "DockerBuildTest", "stepName": "b", "dependsOn": ["a"] }
            ]
        }));
        let g = flow_graph(&f).unwrap();
        assert_eq!(g.edge_pairs(), [("b", "a"), ("a", "b")]);
    }
}
