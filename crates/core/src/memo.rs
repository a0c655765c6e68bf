//! Derived fields computed once per upsert.
//!
//! Memoization is a pure function of the raw resource: feeding the raw part of
//! a memoized value back in yields an identical memo. Derived state is always
//! rebuilt from scratch, never patched.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::duration::{elapsed, parse_timestamp};
use crate::flow::{Flow, Trigger};
use crate::git::repo_org_name;
use crate::workflow::{NodePhase, NodeType, Workflow, WorkflowStatusNode};
use crate::{MalformedFlowError, ResourceError};

// ---- flows ----

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMemo {
    pub trigger: Trigger,
    pub is_pr_flow: bool,
    pub repo_org_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoizedFlow {
    #[serde(flatten)]
    pub flow: Flow,
    pub memo: FlowMemo,
}

impl Deref for MemoizedFlow {
    type Target = Flow;
    fn deref(&self) -> &Flow {
        &self.flow
    }
}

/// The single trigger of a flow.
pub fn resolve_trigger(flow: &Flow) -> Result<&Trigger, MalformedFlowError> {
    match flow.spec.triggers.as_slice() {
        [trigger] => Ok(trigger),
        other => Err(MalformedFlowError { name: flow.metadata.name.clone(), count: other.len() }),
    }
}

pub fn memoize_flow(flow: Flow) -> Result<MemoizedFlow, MalformedFlowError> {
    let trigger = resolve_trigger(&flow)?.clone();
    let memo = FlowMemo {
        is_pr_flow: trigger.is_pr(),
        repo_org_name: repo_org_name(trigger.repo_url()),
        trigger,
    };
    Ok(MemoizedFlow { flow, memo })
}

// ---- workflows ----

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoNode {
    pub id: String,
    pub display_name: String,
    pub phase: NodePhase,
    pub node_type: NodeType,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    pub parameter_map: BTreeMap<String, String>,
    pub output_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMemo {
    pub parameter_map: BTreeMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    /// Visible nodes keyed by display name.
    pub nodes: BTreeMap<String, MemoNode>,
    /// The same nodes, earliest start first; unstarted nodes last.
    pub sorted_nodes: Vec<MemoNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoizedWorkflow {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub memo: WorkflowMemo,
}

impl Deref for MemoizedWorkflow {
    type Target = Workflow;
    fn deref(&self) -> &Workflow {
        &self.workflow
    }
}

impl MemoizedWorkflow {
    pub fn node(&self, display_name: &str) -> Option<&MemoNode> {
        self.memo.nodes.get(display_name)
    }
}

fn parse_opt(workflow: &str, field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ResourceError> {
    raw.map(|s| {
        parse_timestamp(s).map_err(|e| ResourceError::MalformedWorkflow {
            name: workflow.to_string(),
            reason: format!("{}: invalid timestamp {:?}: {}", field, s, e),
        })
    })
    .transpose()
}

fn memoize_node(workflow: &str, node: &WorkflowStatusNode) -> Result<MemoNode, ResourceError> {
    let started_at = parse_opt(workflow, &node.id, node.started_at.as_deref())?;
    let finished_at = parse_opt(workflow, &node.id, node.finished_at.as_deref())?;
    Ok(MemoNode {
        id: node.id.clone(),
        display_name: node.display_name.clone(),
        phase: node.phase,
        node_type: node.node_type,
        started_at,
        finished_at,
        duration: elapsed(started_at, finished_at),
        parameter_map: node.inputs.as_ref().map(|a| a.to_map()).unwrap_or_default(),
        output_map: node.outputs.as_ref().map(|a| a.to_map()).unwrap_or_default(),
    })
}

/// Every child id must name a node in the same status map.
fn check_children(workflow: &Workflow) -> Result<(), ResourceError> {
    let Some(nodes) = workflow.status.nodes.as_ref() else { return Ok(()) };
    let ids: BTreeSet<&str> = nodes.keys().map(String::as_str).collect();
    for node in nodes.values() {
        if let Some(missing) = node.children().iter().find(|c| !ids.contains(c.as_str())) {
            return Err(ResourceError::MalformedWorkflow {
                name: workflow.metadata.name.clone(),
                reason: format!("node {} references missing child {}", node.id, missing),
            });
        }
    }
    Ok(())
}

pub fn memoize_workflow(workflow: Workflow) -> Result<MemoizedWorkflow, ResourceError> {
    check_children(&workflow)?;
    let name = workflow.metadata.name.as_str();
    let started_at = parse_opt(name, "status.startedAt", workflow.status.started_at.as_deref())?;
    let finished_at = parse_opt(name, "status.finishedAt", workflow.status.finished_at.as_deref())?;

    let mut nodes = BTreeMap::new();
    for node in workflow.nodes().filter(|n| n.node_type.is_visible()) {
        let memo = memoize_node(name, node)?;
        if let Some(shadowed) = nodes.insert(memo.display_name.clone(), memo) {
            warn!(workflow = %name, display_name = %shadowed.display_name, shadowed = %shadowed.id, "duplicate node display name; keeping the node with the greater id");
        }
    }
    let mut sorted_nodes: Vec<MemoNode> = nodes.values().cloned().collect();
    sorted_nodes.sort_by(|a, b| {
        a.started_at
            .is_none()
            .cmp(&b.started_at.is_none())
            .then(a.started_at.cmp(&b.started_at))
            .then_with(|| a.display_name.cmp(&b.display_name))
    });

    debug!(workflow = %name, nodes = nodes.len(), "memoized workflow");
    let memo = WorkflowMemo {
        parameter_map: workflow.spec.arguments.to_map(),
        started_at,
        finished_at,
        duration: elapsed(started_at, finished_at),
        nodes,
        sorted_nodes,
    };
    Ok(MemoizedWorkflow { workflow, memo })
}
