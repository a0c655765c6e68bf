//! Flowdash graph: node/edge lists for flows and workflow runs, ready to hand
//! to a layout engine.

#![forbid(unsafe_code)]

pub mod flow;
pub mod history;
pub mod layout;
pub mod workflow;

use flowdash_core::flow::{Step, Trigger};
use flowdash_core::workflow::{NodePhase, NodeType};
use flowdash_core::MalformedFlowError;
use serde::Serialize;

pub use flow::flow_graph;
pub use layout::{EdgeGeometry, Layout, LayoutContractError, LayoutEngine, NodeGeometry, Point};
pub use workflow::workflow_graph;

pub const NODE_WIDTH: f64 = 268.0;
pub const TRIGGER_NODE_HEIGHT: f64 = 115.0;
pub const DOCKER_NODE_HEIGHT: f64 = 134.0;
pub const ARGO_NODE_HEIGHT: f64 = 164.0;
pub const WORKFLOW_NODE_HEIGHT: f64 = 39.0;

/// Display name of the workflow node that stands in for the trigger.
pub const TRIGGER_NODE_NAME: &str = "github-check-start";

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    MalformedFlow(#[from] MalformedFlowError),
    #[error("workflow {workflow}: {reason}")]
    WorkflowGraph { workflow: String, reason: String },
    #[error("duplicate node label {label:?}")]
    DuplicateNode { label: String },
    #[error("step {step:?} depends on unknown node {dependency:?}")]
    UnknownDependency { step: String, dependency: String },
    #[error("no workload data for workflow {workflow}")]
    NoNodes { workflow: String },
    #[error("did not find {name} in {scope} parameters")]
    MissingParameter { name: String, scope: &'static str },
    #[error("invalid event type for node: {0:?}")]
    InvalidEventType(String),
}

impl GraphError {
    pub(crate) fn workflow(workflow: &str, reason: impl Into<String>) -> Self {
        GraphError::WorkflowGraph { workflow: workflow.to_string(), reason: reason.into() }
    }
}

/// What a node stands for, for renderers that draw more than a label.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodePayload {
    Trigger(Trigger),
    Step(Step),
    #[serde(rename_all = "camelCase")]
    WorkflowNode {
        id: String,
        display_name: String,
        phase: NodePhase,
        node_type: NodeType,
        #[serde(skip_serializing_if = "Option::is_none")]
        started_at: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowNode {
    /// Unique within one graph; edges refer to it.
    pub label: String,
    pub width: f64,
    pub height: f64,
    pub payload: NodePayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowEdge {
    pub v: String,
    pub w: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

impl FlowGraph {
    pub fn node(&self, label: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.label == label)
    }

    pub fn edge(&self, label: &str) -> Option<&FlowEdge> {
        self.edges.iter().find(|e| e.label == label)
    }

    /// `(v, w)` pairs in edge order.
    pub fn edge_pairs(&self) -> Vec<(&str, &str)> {
        self.edges.iter().map(|e| (e.v.as_str(), e.w.as_str())).collect()
    }
}

/// Hands out `e1`, `e2`, ... in the order edges are produced.
#[derive(Debug, Default)]
pub struct EdgeLabeler {
    issued: usize,
}

impl EdgeLabeler {
    pub fn edge(&mut self, v: &str, w: &str) -> FlowEdge {
        self.issued += 1;
        FlowEdge { v: v.to_string(), w: w.to_string(), label: format!("e{}", self.issued) }
    }
}
