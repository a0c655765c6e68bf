//! Resource envelope shared by every kind the controller streams, plus the
//! smaller kinds that carry no derived state.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flow::Flow;
use crate::null_as_default;
use crate::workflow::Workflow;
use crate::ResourceError;

/// Annotation the controller sets on delete notifications.
pub const DELETE_EVENT_ANNOTATION: &str = "workflows.jettisonproj.io/v1alpha1/watcher-event-type";
pub const DELETE_EVENT_VALUE: &str = "delete";
/// Label naming the sensor (and therefore the flow) that launched a workflow.
pub const SENSOR_NAME_LABEL: &str = "events.argoproj.io/sensor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Flow,
    Application,
    Rollout,
    Workflow,
    Pod,
    ContainerLog,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Flow,
        ResourceKind::Application,
        ResourceKind::Rollout,
        ResourceKind::Workflow,
        ResourceKind::Pod,
        ResourceKind::ContainerLog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Flow => "Flow",
            ResourceKind::Application => "Application",
            ResourceKind::Rollout => "Rollout",
            ResourceKind::Workflow => "Workflow",
            ResourceKind::Pod => "Pod",
            ResourceKind::ContainerLog => "ContainerLog",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Metadata {
    pub fn namespace_or_empty(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }

    pub fn is_delete_event(&self) -> bool {
        self.annotations.get(DELETE_EVENT_ANNOTATION).map(String::as_str) == Some(DELETE_EVENT_VALUE)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// `namespace/name`, or just `name` when cluster scoped.
    pub fn key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

// ---- small kinds ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub metadata: Metadata,
    pub spec: ApplicationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub source: ApplicationSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub resources: Vec<ApplicationStatusResource>,
    #[serde(default)]
    pub sync: Option<ApplicationSync>,
    #[serde(default)]
    pub health: Option<ApplicationHealth>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStatusResource {
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSync {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationHealth {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RolloutStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStatus {
    #[serde(default)]
    pub phase: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default, deserialize_with = "null_as_default")]
    pub containers: Vec<Container>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub init_containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerLog {
    pub metadata: Metadata,
    pub spec: ContainerLogSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerLogSpec {
    pub container_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub log_lines: Vec<String>,
}

// ---- envelope ----

/// Closed set of resources the controller streams, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    Flow(Flow),
    Application(Application),
    Rollout(Rollout),
    Workflow(Workflow),
    Pod(Pod),
    ContainerLog(ContainerLog),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Flow(_) => ResourceKind::Flow,
            Resource::Application(_) => ResourceKind::Application,
            Resource::Rollout(_) => ResourceKind::Rollout,
            Resource::Workflow(_) => ResourceKind::Workflow,
            Resource::Pod(_) => ResourceKind::Pod,
            Resource::ContainerLog(_) => ResourceKind::ContainerLog,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Resource::Flow(r) => &r.metadata,
            Resource::Application(r) => &r.metadata,
            Resource::Rollout(r) => &r.metadata,
            Resource::Workflow(r) => &r.metadata,
            Resource::Pod(r) => &r.metadata,
            Resource::ContainerLog(r) => &r.metadata,
        }
    }

    /// Decode one wire object. Kinds outside the closed set come back as
    /// `UnknownResourceKind` so callers can skip them.
    pub fn from_value(raw: serde_json::Value) -> Result<Self, ResourceError> {
        let kind_str = raw.get("kind").and_then(|v| v.as_str()).unwrap_or("");
        let kind = ResourceKind::parse(kind_str)
            .ok_or_else(|| ResourceError::UnknownResourceKind(kind_str.to_string()))?;
        let name = raw
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        serde_json::from_value(raw).map_err(|source| ResourceError::Decode { kind, name, source })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    Upsert,
    Delete,
}

/// A resource plus what the controller wants done with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub action: EventAction,
    pub resource: Resource,
}

impl ResourceEvent {
    pub fn new(resource: Resource) -> Self {
        let action = if resource.metadata().is_delete_event() {
            EventAction::Delete
        } else {
            EventAction::Upsert
        };
        Self { action, resource }
    }

    pub fn from_value(raw: serde_json::Value) -> Result<Self, ResourceError> {
        Resource::from_value(raw).map(Self::new)
    }

    pub fn is_delete(&self) -> bool {
        self.action == EventAction::Delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_sentinel_selects_delete_action() {
        let raw = serde_json::json!({
            "kind": "Rollout",
            "metadata": {
                "name": "web",
                "namespace": "prod",
                "annotations": { DELETE_EVENT_ANNOTATION: "delete" }
            },
            "status": { "phase": "Healthy" }
        });
        let ev = ResourceEvent::from_value(raw).unwrap();
        assert!(ev.is_delete());
        assert_eq!(ev.resource.kind(), ResourceKind::Rollout);
        assert_eq!(ev.resource.metadata().key(), "prod/web");
    }

    #[test]
    fn other_annotation_values_mean_upsert() {
        let raw = serde_json::json!({
            "kind": "Pod",
            "metadata": {
                "name": "p",
                "namespace": "ns",
                "annotations": { DELETE_EVENT_ANNOTATION: "update" },
                "labels": null
            }
        });
        let ev = ResourceEvent::from_value(raw).unwrap();
        assert_eq!(ev.action, EventAction::Upsert);
    }

    #[test]
    fn unknown_kind_is_reported_separately() {
        let raw = serde_json::json!({ "kind": "Namespace", "metadata": { "name": "x" } });
        let err = ResourceEvent::from_value(raw).unwrap_err();
        assert!(err.is_unknown_kind(), "err={}", err);
    }

    #[test]
    fn decode_error_names_the_resource() {
        let raw = serde_json::json!({ "kind": "Application", "metadata": { "name": "app" }, "spec": {} });
        let err = ResourceEvent::from_value(raw).unwrap_err();
        assert!(!err.is_unknown_kind());
        let msg = err.to_string();
        assert!(msg.contains("Application") && msg.contains("app"), "msg={}", msg);
    }
}
