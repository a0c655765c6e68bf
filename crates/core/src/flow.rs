//! Flow definitions: one trigger plus a set of dependent steps.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::null_as_default;
use crate::resource::Metadata;

pub const DEFAULT_BASE_REF: &str = "main";
pub const DEFAULT_DOCKERFILE_PATH: &str = "Dockerfile";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub metadata: Metadata,
    pub spec: FlowSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
    #[serde(default, deserialize_with = "null_as_default")]
    pub triggers: Vec<Trigger>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<Step>,
}

// ---- triggers ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    GitHubPush,
    GitHubPullRequest,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::GitHubPush => "GitHubPush",
            TriggerSource::GitHubPullRequest => "GitHubPullRequest",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "triggerSource")]
pub enum Trigger {
    GitHubPush(GitHubPushTrigger),
    GitHubPullRequest(GitHubPullRequestTrigger),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubPushTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_name: Option<String>,
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubPullRequestTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_name: Option<String>,
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_events: Option<Vec<String>>,
}

impl Trigger {
    pub fn source(&self) -> TriggerSource {
        match self {
            Trigger::GitHubPush(_) => TriggerSource::GitHubPush,
            Trigger::GitHubPullRequest(_) => TriggerSource::GitHubPullRequest,
        }
    }

    /// Explicit trigger name, falling back to the source discriminator.
    pub fn display_name(&self) -> &str {
        let explicit = match self {
            Trigger::GitHubPush(t) => t.trigger_name.as_deref(),
            Trigger::GitHubPullRequest(t) => t.trigger_name.as_deref(),
        };
        explicit.unwrap_or(self.source().as_str())
    }

    pub fn repo_url(&self) -> &str {
        match self {
            Trigger::GitHubPush(t) => &t.repo_url,
            Trigger::GitHubPullRequest(t) => &t.repo_url,
        }
    }

    pub fn base_ref(&self) -> Option<&str> {
        match self {
            Trigger::GitHubPush(t) => t.base_ref.as_deref(),
            Trigger::GitHubPullRequest(t) => t.base_ref.as_deref(),
        }
    }

    pub fn is_pr(&self) -> bool {
        match self {
            Trigger::GitHubPush(_) => false,
            Trigger::GitHubPullRequest(_) => true,
        }
    }
}

// ---- steps ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepSource {
    DockerBuildTest,
    DockerBuildTestPublish,
    ArgoCd,
}

impl StepSource {
    pub fn as_str(self) -> &'static str {
        match self {
            StepSource::DockerBuildTest => "DockerBuildTest",
            StepSource::DockerBuildTestPublish => "DockerBuildTestPublish",
            StepSource::ArgoCd => "ArgoCD",
        }
    }
}

impl fmt::Display for StepSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stepSource")]
pub enum Step {
    DockerBuildTest(DockerStep),
    DockerBuildTestPublish(DockerStep),
    #[serde(rename = "ArgoCD")]
    ArgoCd(ArgoCdStep),
}

/// Shared shape of the two docker step flavours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_context_dir: Option<String>,
}

impl DockerStep {
    pub fn dockerfile_path_or_default(&self) -> &str {
        self.dockerfile_path.as_deref().unwrap_or(DEFAULT_DOCKERFILE_PATH)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    pub repo_url: String,
    pub repo_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
}

impl Step {
    pub fn source(&self) -> StepSource {
        match self {
            Step::DockerBuildTest(_) => StepSource::DockerBuildTest,
            Step::DockerBuildTestPublish(_) => StepSource::DockerBuildTestPublish,
            Step::ArgoCd(_) => StepSource::ArgoCd,
        }
    }

    /// Explicit step name, falling back to the source discriminator.
    pub fn display_name(&self) -> &str {
        let explicit = match self {
            Step::DockerBuildTest(s) | Step::DockerBuildTestPublish(s) => s.step_name.as_deref(),
            Step::ArgoCd(s) => s.step_name.as_deref(),
        };
        explicit.unwrap_or(self.source().as_str())
    }

    /// Names this step waits on; empty when it hangs off the trigger.
    pub fn depends_on(&self) -> &[String] {
        let deps = match self {
            Step::DockerBuildTest(s) | Step::DockerBuildTestPublish(s) => s.depends_on.as_deref(),
            Step::ArgoCd(s) => s.depends_on.as_deref(),
        };
        deps.unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_triggers_and_steps() {
        let spec: FlowSpec = serde_json::from_value(serde_json::json!({
            "triggers": [
                { "triggerSource": "GitHubPullRequest", "repoUrl": "https://github.com/acme/web.git", "pullRequestEvents": ["opened"] }
            ],
            "steps": [
                { "stepSource": "DockerBuildTest", "stepName": "build" },
                { "stepSource": "ArgoCD", "repoUrl": "https://github.com/acme/deploy", "repoPath": "web", "dependsOn": ["build"] }
            ]
        }))
        .unwrap();
        let trigger = &spec.triggers[0];
        assert!(trigger.is_pr());
        assert_eq!(trigger.display_name(), "GitHubPullRequest");
        assert_eq!(spec.steps[0].display_name(), "build");
        assert!(spec.steps[0].depends_on().is_empty());
        assert_eq!(spec.steps[1].display_name(), "ArgoCD");
        assert_eq!(spec.steps[1].depends_on(), ["build".to_string()]);
    }

    #[test]
    fn unknown_trigger_source_does_not_decode() {
        let res: Result<Trigger, _> = serde_json::from_value(serde_json::json!({
            "triggerSource": "GitLabPush", "repoUrl": "https://gitlab.com/a/b"
        }));
        assert!(res.is_err());
    }
}
