//! Workflow executions as reported by the workflow controller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::null_as_default;
use crate::resource::Metadata;

/// Display name suffix of the exit-handler node, never drawn.
pub const EXIT_NODE_SUFFIX: &str = ".onExit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: WorkflowSpec,
    #[serde(default)]
    pub status: WorkflowStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default)]
    pub arguments: Arguments,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<Parameter>,
}

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters.iter().find(|p| p.name == name).map(|p| p.value.as_str())
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.parameters.iter().map(|p| (p.name.clone(), p.value.clone())).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phase: WorkflowPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<BTreeMap<String, WorkflowStatusNode>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowPhase {
    #[default]
    #[serde(rename = "")]
    Unknown,
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodePhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Skipped,
    Failed,
    Error,
    Omitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Pod,
    Container,
    #[serde(rename = "DAG")]
    Dag,
    Skipped,
    /// Any node type this dashboard does not draw (Steps, Retry, ...).
    #[serde(other)]
    Unrecognized,
}

impl NodeType {
    /// Pods and skipped pods map onto flow steps; everything else is
    /// scheduling structure.
    pub fn is_visible(self) -> bool {
        match self {
            NodeType::Pod | NodeType::Skipped => true,
            NodeType::Container | NodeType::Dag | NodeType::Unrecognized => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    #[serde(default)]
    pub name: String,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatusNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub display_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phase: NodePhase,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<TemplateRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Arguments>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Arguments>,
}

impl WorkflowStatusNode {
    pub fn children(&self) -> &[String] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Visible type and not the exit handler.
    pub fn is_graph_node(&self) -> bool {
        self.node_type.is_visible() && !self.display_name.ends_with(EXIT_NODE_SUFFIX)
    }

    pub fn template(&self) -> Option<&str> {
        self.template_ref
            .as_ref()
            .map(|t| t.template.as_str())
            .or(self.template_name.as_deref())
    }
}

impl Workflow {
    /// Status nodes, empty when the controller has not reported any yet.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowStatusNode> {
        self.status.nodes.iter().flat_map(|m| m.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_phase_and_node_types() {
        let wf: Workflow = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "wf-1", "namespace": "ci" },
            "spec": { "arguments": { "parameters": [ { "name": "repo", "value": "acme/web" } ] } },
            "status": {
                "phase": "",
                "nodes": {
                    "wf-1": { "id": "wf-1", "displayName": "wf-1", "type": "DAG", "phase": "Running", "children": ["a"] },
                    "a": { "id": "a", "displayName": "build", "type": "Pod", "phase": "Succeeded" },
                    "r": { "id": "r", "displayName": "retry", "type": "Retry", "phase": "Running" }
                }
            }
        }))
        .unwrap();
        assert_eq!(wf.status.phase, WorkflowPhase::Unknown);
        let nodes = wf.status.nodes.as_ref().unwrap();
        assert_eq!(nodes["wf-1"].node_type, NodeType::Dag);
        assert!(nodes["a"].is_graph_node());
        assert_eq!(nodes["r"].node_type, NodeType::Unrecognized);
        assert_eq!(wf.spec.arguments.get("repo"), Some("acme/web"));
    }

    #[test]
    fn exit_handler_is_not_a_graph_node() {
        let node: WorkflowStatusNode = serde_json::from_value(serde_json::json!({
            "id": "x", "displayName": "wf-1.onExit", "type": "Pod", "phase": "Succeeded"
        }))
        .unwrap();
        assert!(!node.is_graph_node());
    }
}
