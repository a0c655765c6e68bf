//! Flowdash core types: the resource model, wire decoding and memoization.

#![forbid(unsafe_code)]

pub mod duration;
pub mod flow;
pub mod git;
pub mod memo;
pub mod resource;
pub mod workflow;

mod error;

pub use error::{MalformedFlowError, ResourceError};
pub use resource::{EventAction, Metadata, Resource, ResourceEvent, ResourceKind};

pub mod prelude {
    pub use super::flow::{Flow, Step, StepSource, Trigger, TriggerSource};
    pub use super::memo::{FlowMemo, MemoNode, MemoizedFlow, MemoizedWorkflow, WorkflowMemo};
    pub use super::resource::{
        Application, ContainerLog, EventAction, Metadata, Pod, Resource, ResourceEvent,
        ResourceKind, Rollout,
    };
    pub use super::workflow::{NodePhase, NodeType, Workflow, WorkflowPhase, WorkflowStatusNode};
    pub use super::{MalformedFlowError, ResourceError};
}

/// Deserialize `null` as the type's default, for fields the controller may
/// send either absent or as an explicit null.
pub(crate) fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    use serde::Deserialize;
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}
