use thiserror::Error;

use crate::types::{AudienceId, NodeId, TemplateId, TriggerId};

pub type FlowResult<T> = Result<T, FlowError>;

/// Errors raised by graph mutations. A mutation that returns one of these
/// has left the graph untouched.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Trigger {0} not found")]
    TriggerNotFound(TriggerId),

    #[error("Entry node {0} cannot be removed while other steps exist")]
    EntryNodeProtected(NodeId),

    #[error("Connecting trigger {trigger_id} back to the entry would strand {} step(s)", .stranded.len())]
    SelfLoopOnEntry {
        trigger_id: TriggerId,
        stranded: Vec<NodeId>,
    },

    #[error("Exit step {0} cannot own branches")]
    ExitStepBranch(NodeId),

    #[error("Node {0} is not an audience step")]
    NotAnAudienceStep(NodeId),

    #[error("Node {node_id} already has the maximum of {limit} branches")]
    TriggerLimitExceeded { node_id: NodeId, limit: usize },

    #[error("Graph is not activatable: {} unreachable step(s), {} dangling branch(es)", .unreachable.len(), .dangling.len())]
    NotActivatable {
        unreachable: Vec<NodeId>,
        dangling: Vec<TriggerId>,
    },

    #[error("Graph has no steps")]
    EmptyGraph,

    #[error("No connection drag in progress")]
    NoPendingConnection,

    #[error("Invalid draft: {0}")]
    InvalidDraft(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Failure of an audience lookup. Always scoped to a single step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Audience {0} not found")]
    NotFound(AudienceId),

    #[error("Transient resolver error: {0}")]
    Transient(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Template {0} not found")]
    NotFound(TemplateId),
}

impl From<config::ConfigError> for FlowError {
    fn from(err: config::ConfigError) -> Self {
        FlowError::Config(err.to_string())
    }
}
