use crate::ResourceKind;

/// A flow whose trigger list does not hold exactly one trigger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed flow {name:?}: expected exactly 1 trigger, found {count}")]
pub struct MalformedFlowError {
    pub name: String,
    pub count: usize,
}

/// Errors raised while decoding or memoizing a single resource event.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("unknown resource kind: {0:?}")]
    UnknownResourceKind(String),
    #[error("decoding {kind} {name:?}: {source}")]
    Decode {
        kind: ResourceKind,
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    MalformedFlow(#[from] MalformedFlowError),
    #[error("malformed workflow {name:?}: {reason}")]
    MalformedWorkflow { name: String, reason: String },
}

impl ResourceError {
    /// Unknown kinds are skipped rather than treated as failures.
    pub fn is_unknown_kind(&self) -> bool {
        matches!(self, ResourceError::UnknownResourceKind(_))
    }
}
