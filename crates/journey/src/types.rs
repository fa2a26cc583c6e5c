use serde::{Deserialize, Serialize};

use campaign_core::types::{ChannelIcon, Position, ResolutionStatus};
use campaign_core::{AudienceId, AudienceMetadata, Channel, NodeId, StepKind, TemplateId, TriggerId};

/// A per-channel content binding on a step. `template_id == None` means the
/// channel is configured but no template has been picked yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub channel: Channel,
    pub template_id: Option<TemplateId>,
}

/// A branch owned by exactly one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub source_node_id: NodeId,
    pub target_node_id: Option<NodeId>,
    /// Display only. Never part of the branch's identity.
    pub label: Option<String>,
}

impl Trigger {
    pub fn is_dangling(&self) -> bool {
        self.target_node_id.is_none()
    }
}

/// Editor-owned flags. Not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    pub hidden: bool,
    pub selected: bool,
    pub needs_resolution_refresh: bool,
}

/// Metadata snapshot taken from a successful audience resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAudience {
    pub audience_id: AudienceId,
    pub name: String,
    pub description: String,
    pub is_dynamic: bool,
    pub icon_ref: Option<String>,
    pub display_width: String,
}

impl ResolvedAudience {
    pub fn from_metadata(audience_id: AudienceId, meta: AudienceMetadata, default_width: &str) -> Self {
        Self {
            audience_id,
            name: meta.name,
            description: meta.description,
            is_dynamic: meta.is_dynamic,
            icon_ref: meta.icon_ref,
            display_width: meta
                .display_width
                .unwrap_or_else(|| default_width.to_string()),
        }
    }
}

// ─── Read-only projections for the canvas ───────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub channel: Channel,
    pub template_id: Option<TemplateId>,
    pub icon: ChannelIcon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerView {
    pub id: TriggerId,
    pub label: Option<String>,
    pub target: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: NodeId,
    pub kind: StepKind,
    pub position: Position,
    pub is_primary: bool,
    pub audience_id: Option<AudienceId>,
    pub status: Option<ResolutionStatus>,
    pub name: String,
    pub description: String,
    pub is_dynamic: bool,
    pub icon_ref: Option<String>,
    pub display_width: String,
    pub messages: Vec<MessageView>,
    pub triggers: Vec<TriggerView>,
    pub flags: NodeFlags,
    pub accepts_connection: bool,
}
