//! Helpers for the run history of a flow: which run last executed a node,
//! pod names for log lookups, well-known parameters and repository links.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use flowdash_core::flow::{Step, DEFAULT_BASE_REF};
use flowdash_core::git::trim_git_suffix;
use flowdash_core::memo::{MemoNode, MemoizedWorkflow};
use flowdash_core::workflow::{Arguments, NodePhase, NodeType, WorkflowStatusNode};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{GraphError, TRIGGER_NODE_NAME};

pub use flowdash_core::duration::human_duration;

const SKIPPED_OUTPUT: &str = "Skipped";
const SKIP_STATUS_OUTPUTS: [&str; 2] = ["docker-build-pr-status", "docker-build-commit-status"];

/// A memoized node together with the run it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowNodeRef<'a> {
    pub workflow: &'a MemoizedWorkflow,
    pub node: &'a MemoNode,
}

fn ran(node: &MemoNode) -> bool {
    !matches!(node.phase, NodePhase::Skipped | NodePhase::Omitted)
        && SKIP_STATUS_OUTPUTS
            .iter()
            .all(|k| node.output_map.get(*k).map(String::as_str) != Some(SKIPPED_OUTPUT))
}

/// First run in `workflows` (newest first) that actually executed `node_name`.
pub fn last_workflow_node<'a>(node_name: &str, workflows: &'a [Arc<MemoizedWorkflow>]) -> Option<WorkflowNodeRef<'a>> {
    workflows.iter().find_map(|wf| {
        let node = wf.node(node_name).filter(|n| ran(n))?;
        Some(WorkflowNodeRef { workflow: wf, node })
    })
}

pub fn last_workflow_node_for_step<'a>(step: &Step, workflows: &'a [Arc<MemoizedWorkflow>]) -> Option<WorkflowNodeRef<'a>> {
    last_workflow_node(step.display_name(), workflows)
}

pub fn last_workflow_node_for_trigger(workflows: &[Arc<MemoizedWorkflow>]) -> Option<WorkflowNodeRef<'_>> {
    last_workflow_node(TRIGGER_NODE_NAME, workflows)
}

// ---- pod names ----

const MAX_K8S_NAME_LENGTH: usize = 253;
const K8S_NAMING_HASH_LENGTH: usize = 10;
const MAX_PREFIX_LENGTH: usize = MAX_K8S_NAME_LENGTH - K8S_NAMING_HASH_LENGTH;

static CONTAINER_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[^/.]+$").expect("static regex"));

/// 32-bit FNV-1a over UTF-16 code units.
fn fnv_hash(input: &str) -> u32 {
    input
        .encode_utf16()
        .fold(2_166_136_261u32, |h, c| (h ^ u32::from(c)).wrapping_mul(16_777_619))
}

/// Longest prefix of `s` that fits in `max` UTF-16 code units. A surrogate
/// pair that would straddle the limit is dropped whole.
fn truncate_utf16(s: &str, max: usize) -> &str {
    let mut units = 0;
    for (idx, c) in s.char_indices() {
        units += c.len_utf16();
        if units > max {
            return &s[..idx];
        }
    }
    s
}

/// Name of the pod that ran `node`, as the workflow controller derives it:
/// `<workflow>-<template>-<hash of node name>`. Container nodes resolve to
/// their owning pod.
pub fn workflow_pod_name(workflow_name: &str, node: &WorkflowStatusNode) -> String {
    let pod_node_name = match node.node_type {
        NodeType::Container => CONTAINER_SUFFIX.replace(&node.name, ""),
        _ => node.name.as_str().into(),
    };
    if pod_node_name == workflow_name {
        return workflow_name.to_string();
    }
    let Some(template) = node.template() else {
        return node.id.clone();
    };
    let prefix = format!("{}-{}", workflow_name, template);
    let prefix = truncate_utf16(&prefix, MAX_PREFIX_LENGTH - 1);
    format!("{}-{}", prefix, fnv_hash(&pod_node_name))
}

// ---- parameters ----

fn required<'a>(map: &'a BTreeMap<String, String>, name: &str, scope: &'static str) -> Result<&'a str, GraphError> {
    map.get(name)
        .map(String::as_str)
        .ok_or_else(|| GraphError::MissingParameter { name: name.to_string(), scope })
}

/// Well-known workflow arguments set by the sensor that launched the run.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowParams<'a>(pub &'a BTreeMap<String, String>);

impl<'a> WorkflowParams<'a> {
    pub fn of(workflow: &'a MemoizedWorkflow) -> Self {
        Self(&workflow.memo.parameter_map)
    }

    fn get(&self, name: &str) -> Result<&'a str, GraphError> {
        required(self.0, name, "workflow")
    }

    pub fn repo(&self) -> Result<&'a str, GraphError> {
        self.get("repo")
    }

    pub fn revision(&self) -> Result<&'a str, GraphError> {
        self.get("revision")
    }

    pub fn revision_ref(&self) -> Result<&'a str, GraphError> {
        self.get("revision-ref")
    }

    pub fn revision_title(&self) -> Result<&'a str, GraphError> {
        self.get("revision-title")
    }

    pub fn revision_author(&self) -> Result<&'a str, GraphError> {
        self.get("revision-author")
    }

    /// Pull request number; absent on push runs.
    pub fn revision_number(&self) -> Result<&'a str, GraphError> {
        self.get("revision-number")
    }
}

pub fn dockerfile_path(node: &MemoNode) -> Result<&str, GraphError> {
    required(&node.parameter_map, "dockerfile-path", "workflow")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Pr,
    Push,
}

impl EventType {
    pub fn display_name(self) -> &'static str {
        match self {
            EventType::Pr => "PR",
            EventType::Push => "PUSH",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Input parameters of a raw status node.
#[derive(Debug, Clone, Copy)]
pub struct NodeParams<'a>(pub Option<&'a Arguments>);

impl<'a> NodeParams<'a> {
    pub fn of(node: &'a WorkflowStatusNode) -> Self {
        Self(node.inputs.as_ref())
    }

    fn get(&self, name: &str) -> Result<&'a str, GraphError> {
        self.0
            .and_then(|a| a.get(name))
            .ok_or_else(|| GraphError::MissingParameter { name: name.to_string(), scope: "node" })
    }

    pub fn resource_path(&self) -> Result<&'a str, GraphError> {
        self.get("resource-path")
    }

    pub fn event_type(&self) -> Result<EventType, GraphError> {
        match self.get("event-type")? {
            "PR" => Ok(EventType::Pr),
            "commit" => Ok(EventType::Push),
            other => Err(GraphError::InvalidEventType(other.to_string())),
        }
    }
}

// ---- links ----

pub fn repo_commit_link(repo_url: &str, commit: &str) -> String {
    format!("{}/commit/{}", trim_git_suffix(repo_url), commit)
}

pub fn repo_tree_link(repo_url: &str, base_ref: Option<&str>) -> String {
    format!("{}/tree/{}", trim_git_suffix(repo_url), base_ref.unwrap_or(DEFAULT_BASE_REF))
}

/// Last non-empty path segment without `.git`, or `default` when there is
/// none.
pub fn display_repo_path(pathname: &str, default: &str) -> String {
    match pathname.split('/').rev().find(|s| !s.is_empty()) {
        Some(last) => trim_git_suffix(last).to_string(),
        None => default.to_string(),
    }
}
