//! Flowdash store: nested copy-on-write snapshots of every resource kind,
//! the reconciler that folds event batches into them, and the ingest loop
//! that publishes them to readers.

#![forbid(unsafe_code)]

pub mod cow;
pub mod reconcile;

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use flowdash_core::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Serialize, Serializer};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

pub use cow::{CowMap, Map2, Map3, Slot, Tree};
pub use reconcile::{apply, ApplyError, ApplyReport, BatchPolicy, Change, ParsePolicyError};

pub const PUSH_SLOT: &str = "push";
pub const PR_SLOT: &str = "pr";

/// The push and pull-request flows configured for one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPrFlows {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_flow: Option<Arc<MemoizedFlow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_flow: Option<Arc<MemoizedFlow>>,
}

impl PushPrFlows {
    pub fn get(&self, pr: bool) -> Option<&Arc<MemoizedFlow>> {
        if pr {
            self.pr_flow.as_ref()
        } else {
            self.push_flow.as_ref()
        }
    }

    fn slot_mut(&mut self, slot: &str) -> Option<&mut Option<Arc<MemoizedFlow>>> {
        match slot {
            PUSH_SLOT => Some(&mut self.push_flow),
            PR_SLOT => Some(&mut self.pr_flow),
            _ => None,
        }
    }
}

impl Tree for PushPrFlows {
    type Leaf = Arc<MemoizedFlow>;
    const DEPTH: usize = 1;

    fn lookup(&self, path: &[&str]) -> Option<&Self::Leaf> {
        match path {
            [PUSH_SLOT] => self.push_flow.as_ref(),
            [PR_SLOT] => self.pr_flow.as_ref(),
            _ => None,
        }
    }

    fn insert(&mut self, path: &[&str], leaf: Self::Leaf) -> Option<Self::Leaf> {
        let [slot] = path else { return None };
        self.slot_mut(slot)?.replace(leaf)
    }

    fn remove(&mut self, path: &[&str]) -> Option<Self::Leaf> {
        let [slot] = path else { return None };
        self.slot_mut(slot)?.take()
    }

    fn is_vacant(&self) -> bool {
        self.push_flow.is_none() && self.pr_flow.is_none()
    }
}

/// Log lines of one container, in arrival order without duplicates.
#[derive(Debug, Clone, Default)]
pub struct LogLines {
    lines: Vec<String>,
    seen: FxHashSet<String>,
}

impl LogLines {
    pub fn from_lines<I: IntoIterator<Item = String>>(lines: I) -> Self {
        let mut out = Self::default();
        for line in lines {
            out.push(line);
        }
        out
    }

    fn push(&mut self, line: String) -> bool {
        if self.seen.contains(&line) {
            return false;
        }
        self.seen.insert(line.clone());
        self.lines.push(line);
        true
    }

    /// A copy extended with the unseen lines of `incoming`, or `None` when
    /// every line is already present.
    pub fn merged(&self, incoming: &[String]) -> Option<LogLines> {
        let mut fresh = incoming.iter().filter(|l| !self.seen.contains(*l)).peekable();
        fresh.peek()?;
        let mut next = self.clone();
        for line in fresh {
            next.push(line.clone());
        }
        Some(next)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl PartialEq for LogLines {
    fn eq(&self, other: &Self) -> bool {
        self.lines == other.lines
    }
}

impl Serialize for LogLines {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.lines.serialize(s)
    }
}

/// One immutable view of everything the controller has reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    pub epoch: u64,
    /// repoOrgName → push/pr
    pub flows: CowMap<PushPrFlows>,
    /// clone URL → path
    pub applications: Map2<Application>,
    /// namespace → name
    pub rollouts: Map2<Rollout>,
    /// namespace → flow → workflow
    pub workflows: Map3<MemoizedWorkflow>,
    /// namespace → name
    pub pods: Map2<Pod>,
    /// namespace → pod → container
    pub container_logs: Map3<LogLines>,
}

trait LeafCount {
    fn leaf_count(&self) -> usize;
}

impl<T> LeafCount for Slot<T> {
    fn leaf_count(&self) -> usize {
        usize::from(self.get().is_some())
    }
}

impl LeafCount for PushPrFlows {
    fn leaf_count(&self) -> usize {
        usize::from(self.push_flow.is_some()) + usize::from(self.pr_flow.is_some())
    }
}

impl<C: LeafCount> LeafCount for CowMap<C> {
    fn leaf_count(&self) -> usize {
        self.values().map(LeafCount::leaf_count).sum()
    }
}

impl WorldState {
    pub fn flow(&self, repo_org_name: &str, pr: bool) -> Option<&Arc<MemoizedFlow>> {
        self.flows.get(repo_org_name)?.get(pr)
    }

    pub fn workflow(&self, namespace: &str, flow: &str, name: &str) -> Option<&Arc<MemoizedWorkflow>> {
        self.workflows.lookup(&[namespace, flow, name])
    }

    /// Workflows launched by one flow, most recently started first.
    pub fn workflow_history(&self, namespace: &str, flow: &str) -> Vec<Arc<MemoizedWorkflow>> {
        let Some(by_name) = self.workflows.get(namespace).and_then(|m| m.get(flow)) else {
            return Vec::new();
        };
        let mut out: Vec<_> = by_name.values().filter_map(|s| s.get().cloned()).collect();
        out.sort_by(|a, b| {
            b.memo
                .started_at
                .cmp(&a.memo.started_at)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });
        out
    }

    pub fn log_lines(&self, namespace: &str, pod: &str, container: &str) -> Option<&Arc<LogLines>> {
        self.container_logs.lookup(&[namespace, pod, container])
    }

    /// Stored resources per kind.
    pub fn counts(&self) -> BTreeMap<ResourceKind, usize> {
        BTreeMap::from([
            (ResourceKind::Flow, self.flows.leaf_count()),
            (ResourceKind::Application, self.applications.leaf_count()),
            (ResourceKind::Rollout, self.rollouts.leaf_count()),
            (ResourceKind::Workflow, self.workflows.leaf_count()),
            (ResourceKind::Pod, self.pods.leaf_count()),
            (ResourceKind::ContainerLog, self.container_logs.leaf_count()),
        ])
    }
}

// ---- ingest ----

/// Ingest settings, read from the environment at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    /// Bounded batch channel capacity.
    pub queue_cap: usize,
    pub policy: BatchPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { queue_cap: 256, policy: BatchPolicy::Isolate }
    }
}

impl IngestConfig {
    /// `FLOWDASH_QUEUE_CAP` and `FLOWDASH_BATCH_POLICY`; unparsable values
    /// fall back to the defaults with a warning.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var("FLOWDASH_QUEUE_CAP") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => cfg.queue_cap = n,
                _ => warn!(value = %raw, "ignoring invalid FLOWDASH_QUEUE_CAP"),
            }
        }
        if let Ok(raw) = std::env::var("FLOWDASH_BATCH_POLICY") {
            match raw.parse::<BatchPolicy>() {
                Ok(p) => cfg.policy = p,
                Err(e) => warn!(error = %e, "ignoring invalid FLOWDASH_BATCH_POLICY"),
            }
        }
        cfg
    }
}

/// Handle for readers to access the current snapshot and subscribe to swaps.
#[derive(Clone)]
pub struct BackendHandle {
    snap: Arc<ArcSwap<WorldState>>,
    epoch_rx: watch::Receiver<u64>,
    reports: Arc<ArcSwap<ApplyReport>>,
    // kept only to hand out fresh receivers; closes when the ingest loop stops
    report_rx: Arc<broadcast::Receiver<Arc<ApplyReport>>>,
}

impl BackendHandle {
    pub fn current(&self) -> Arc<WorldState> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }

    /// Report of the batch that produced the current snapshot.
    pub fn last_report(&self) -> Arc<ApplyReport> {
        self.reports.load_full()
    }

    /// Every report published after this call, one per applied batch, in
    /// epoch order. The receiver reports `Closed` once the ingest loop has
    /// stopped and everything before it was read; a reader that falls more
    /// than `queue_cap` reports behind gets `Lagged`.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<Arc<ApplyReport>> {
        self.report_rx.resubscribe()
    }
}

/// Spawn the ingest loop. Each received batch becomes exactly one snapshot,
/// applied in arrival order. Aborted batches publish nothing.
pub fn spawn_ingest(cfg: IngestConfig) -> (mpsc::Sender<Vec<serde_json::Value>>, BackendHandle) {
    let (tx, mut rx) = mpsc::channel::<Vec<serde_json::Value>>(cfg.queue_cap);
    let snap = Arc::new(ArcSwap::from_pointee(WorldState::default()));
    let reports = Arc::new(ArcSwap::from_pointee(ApplyReport::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let (report_tx, report_rx) = broadcast::channel::<Arc<ApplyReport>>(cfg.queue_cap);
    let snap_clone = Arc::clone(&snap);
    let reports_clone = Arc::clone(&reports);

    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let size = batch.len();
            let current = snap_clone.load_full();
            match apply(&current, batch, cfg.policy) {
                Ok((next, report)) => {
                    let epoch = next.epoch;
                    debug!(epoch, size, upserts = report.upserts, deletes = report.deletes, "snapshot published");
                    let report = Arc::new(report);
                    reports_clone.store(Arc::clone(&report));
                    snap_clone.store(Arc::new(next));
                    // no subscribers is fine
                    let _ = report_tx.send(report);
                    let _ = epoch_tx.send(epoch);
                }
                Err(e) => warn!(error = %e, size, "batch aborted; snapshot unchanged"),
            }
        }
        info!("ingest loop stopped");
    });

    (tx, BackendHandle { snap, epoch_rx, reports, report_rx: Arc::new(report_rx) })
}
