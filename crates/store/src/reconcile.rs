//! Folding event batches into a new snapshot.
//!
//! `apply` never mutates the snapshot it is given. It clones the top-level
//! handles (a handful of `Arc` bumps) and writes through [`Tree`], so only the
//! containers on a written path are copied and everything else stays shared.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use flowdash_core::git::append_git_suffix;
use flowdash_core::memo::{memoize_flow, memoize_workflow};
use flowdash_core::resource::SENSOR_NAME_LABEL;
use flowdash_core::{EventAction, Resource, ResourceError, ResourceEvent, ResourceKind};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cow::Tree;
use crate::{LogLines, WorldState, PR_SLOT, PUSH_SLOT};

/// What to do with an event that fails to decode or memoize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPolicy {
    /// Record it in the report and keep going.
    #[default]
    Isolate,
    /// Fail the whole batch; the caller keeps its snapshot.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown batch policy {0:?} (expected isolate or abort)")]
pub struct ParsePolicyError(pub String);

impl FromStr for BatchPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(BatchPolicy::Isolate),
            "abort" => Ok(BatchPolicy::Abort),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

impl fmt::Display for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchPolicy::Isolate => "isolate",
            BatchPolicy::Abort => "abort",
        })
    }
}

/// One applied change, in batch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub action: EventAction,
    pub kind: ResourceKind,
    /// `namespace/name`, or `name` when cluster scoped.
    pub key: String,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.action {
            EventAction::Upsert => '+',
            EventAction::Delete => '-',
        };
        write!(f, "{} {} {}", sign, self.kind, self.key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub upserts: usize,
    pub deletes: usize,
    /// Deletes of keys that were not stored.
    pub noop_deletes: usize,
    /// Unknown kinds and workflows without a sensor label.
    pub skipped: usize,
    /// Events that failed to decode or memoize under `BatchPolicy::Isolate`.
    pub rejected: usize,
    /// Kinds with at least one applied upsert or delete.
    pub touched: BTreeSet<ResourceKind>,
    pub changes: Vec<Change>,
}

impl ApplyReport {
    pub fn has_events(&self, kind: ResourceKind) -> bool {
        self.touched.contains(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// The event that failed a batch under `BatchPolicy::Abort`.
#[derive(Debug, thiserror::Error)]
#[error("event #{index} ({name:?}) rejected: {source}")]
pub struct ApplyError {
    pub index: usize,
    pub name: String,
    #[source]
    pub source: ResourceError,
}

/// Fold `batch` into a copy of `current`.
///
/// Events apply in order; a later event for the same key wins. Unknown kinds
/// are always skipped. Other failures follow `policy`.
pub fn apply<I>(current: &WorldState, batch: I, policy: BatchPolicy) -> Result<(WorldState, ApplyReport), ApplyError>
where
    I: IntoIterator<Item = serde_json::Value>,
{
    let started = Instant::now();
    let mut next = current.clone();
    let mut report = ApplyReport::default();

    for (index, raw) in batch.into_iter().enumerate() {
        let name = raw
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let result = ResourceEvent::from_value(raw).and_then(|ev| fold(&mut next, ev, &mut report));
        match result {
            Ok(()) => {}
            Err(e) if e.is_unknown_kind() => {
                debug!(index, name = %name, error = %e, "skipping event");
                report.skipped += 1;
            }
            Err(source) => match policy {
                BatchPolicy::Isolate => {
                    warn!(index, name = %name, error = %source, "rejected event");
                    counter!("flowdash_events_rejected_total", 1);
                    report.rejected += 1;
                }
                BatchPolicy::Abort => {
                    counter!("flowdash_events_rejected_total", 1);
                    return Err(ApplyError { index, name, source });
                }
            },
        }
    }

    next.epoch = current.epoch.saturating_add(1);
    counter!("flowdash_events_applied_total", (report.upserts + report.deletes) as u64);
    histogram!("flowdash_apply_ms", started.elapsed().as_secs_f64() * 1000.0);
    Ok((next, report))
}

fn upsert<T: Tree>(tree: &mut T, path: &[&str], leaf: T::Leaf, report: &mut ApplyReport) -> bool {
    tree.insert(path, leaf);
    report.upserts += 1;
    true
}

fn delete<T: Tree>(tree: &mut T, path: &[&str], report: &mut ApplyReport) -> bool {
    if tree.remove(path).is_some() {
        report.deletes += 1;
        true
    } else {
        report.noop_deletes += 1;
        false
    }
}

/// Apply one decoded event. Every fallible step runs before the first write,
/// so an error leaves `state` untouched.
fn fold(state: &mut WorldState, event: ResourceEvent, report: &mut ApplyReport) -> Result<(), ResourceError> {
    let ResourceEvent { action, resource } = event;
    let kind = resource.kind();
    let key = resource.metadata().key();

    let changed = match resource {
        Resource::Flow(flow) => {
            let flow = memoize_flow(flow)?;
            let repo = flow.memo.repo_org_name.clone();
            let slot = if flow.memo.is_pr_flow { PR_SLOT } else { PUSH_SLOT };
            let path = [repo.as_str(), slot];
            match action {
                EventAction::Upsert => upsert(&mut state.flows, &path, Arc::new(flow), report),
                EventAction::Delete => delete(&mut state.flows, &path, report),
            }
        }
        Resource::Application(app) => {
            let clone_url = append_git_suffix(&app.spec.source.repo_url);
            let app_path = app.spec.source.path.clone();
            let path = [clone_url.as_str(), app_path.as_str()];
            match action {
                EventAction::Upsert => upsert(&mut state.applications, &path, Arc::new(app), report),
                EventAction::Delete => delete(&mut state.applications, &path, report),
            }
        }
        Resource::Rollout(rollout) => {
            let ns = rollout.metadata.namespace_or_empty().to_string();
            let name = rollout.metadata.name.clone();
            let path = [ns.as_str(), name.as_str()];
            match action {
                EventAction::Upsert => upsert(&mut state.rollouts, &path, Arc::new(rollout), report),
                EventAction::Delete => delete(&mut state.rollouts, &path, report),
            }
        }
        Resource::Pod(pod) => {
            let ns = pod.metadata.namespace_or_empty().to_string();
            let name = pod.metadata.name.clone();
            let path = [ns.as_str(), name.as_str()];
            match action {
                EventAction::Upsert => upsert(&mut state.pods, &path, Arc::new(pod), report),
                EventAction::Delete => delete(&mut state.pods, &path, report),
            }
        }
        Resource::Workflow(workflow) => {
            let Some(flow_name) = workflow.metadata.label(SENSOR_NAME_LABEL).map(str::to_string) else {
                warn!(workflow = %key, label = SENSOR_NAME_LABEL, "workflow has no sensor label; dropping event");
                report.skipped += 1;
                return Ok(());
            };
            let ns = workflow.metadata.namespace_or_empty().to_string();
            let name = workflow.metadata.name.clone();
            let path = [ns.as_str(), flow_name.as_str(), name.as_str()];
            match action {
                EventAction::Upsert => {
                    let memoized = memoize_workflow(workflow)?;
                    upsert(&mut state.workflows, &path, Arc::new(memoized), report)
                }
                EventAction::Delete => delete(&mut state.workflows, &path, report),
            }
        }
        Resource::ContainerLog(log) => {
            let ns = log.metadata.namespace_or_empty().to_string();
            let pod = log.metadata.name.clone();
            let container = log.spec.container_name.clone();
            let path = [ns.as_str(), pod.as_str(), container.as_str()];
            match action {
                EventAction::Upsert => {
                    let merged = match state.container_logs.lookup(&path) {
                        Some(existing) => existing.merged(&log.spec.log_lines),
                        None => Some(LogLines::from_lines(log.spec.log_lines)),
                    };
                    match merged {
                        Some(lines) => upsert(&mut state.container_logs, &path, Arc::new(lines), report),
                        // nothing new; keep the stored lines shared
                        None => false,
                    }
                }
                EventAction::Delete => delete(&mut state.container_logs, &path, report),
            }
        }
    };

    if changed {
        report.touched.insert(kind);
        report.changes.push(Change { action, kind, key });
    }
    Ok(())
}
