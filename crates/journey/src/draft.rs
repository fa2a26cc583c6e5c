//! JSON draft import for editor fixtures and the CLI.
//!
//! A draft names steps by local keys and is replayed through the public graph
//! mutations, so every invariant holds exactly as if a user had built it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use campaign_core::event_bus::GraphEventSink;
use campaign_core::types::Position;
use campaign_core::{AudienceId, Channel, FlowError, FlowResult, NodeId, StepKind, TemplateId};

use crate::graph::{GraphSettings, JourneyGraph};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDraft {
    pub nodes: Vec<DraftNode>,
    /// Key of the entry step. Defaults to the first step.
    #[serde(default)]
    pub entry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftNode {
    pub key: String,
    pub kind: StepKind,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub audience_id: Option<AudienceId>,
    #[serde(default)]
    pub messages: Vec<DraftMessage>,
    #[serde(default)]
    pub triggers: Vec<DraftTrigger>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftMessage {
    pub channel: Channel,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftTrigger {
    #[serde(default)]
    pub label: Option<String>,
    /// Key of the target step; absent for a dangling branch.
    #[serde(default)]
    pub target: Option<String>,
}

impl FlowDraft {
    pub fn from_json(json: &str) -> FlowResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds the graph. Returns it together with the ids assigned to each
    /// draft key. Audience lookups are left queued on the graph.
    pub fn build(
        self,
        settings: GraphSettings,
        sink: Arc<dyn GraphEventSink>,
    ) -> FlowResult<(JourneyGraph, HashMap<String, NodeId>)> {
        let mut graph = JourneyGraph::new()
            .with_settings(settings)
            .with_event_sink(sink);

        let mut ids = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if ids.contains_key(&node.key) {
                return Err(FlowError::InvalidDraft(format!(
                    "duplicate step key '{}'",
                    node.key
                )));
            }
            ids.insert(node.key.clone(), graph.add_node(node.kind, node.position));
        }
        let lookup = |key: &str| {
            ids.get(key)
                .copied()
                .ok_or_else(|| FlowError::InvalidDraft(format!("unknown step key '{key}'")))
        };

        if let Some(entry) = &self.entry {
            graph.set_entry(lookup(entry)?)?;
        }

        for node in &self.nodes {
            let node_id = lookup(&node.key)?;
            for message in &node.messages {
                graph.assign_template(node_id, message.channel, message.template_id)?;
            }
            for trigger in &node.triggers {
                let trigger_id = graph.add_trigger(node_id)?;
                if trigger.label.is_some() {
                    graph.set_trigger_label(trigger_id, trigger.label.clone())?;
                }
                if let Some(target) = &trigger.target {
                    graph.connect_trigger(trigger_id, lookup(target)?)?;
                }
            }
            if node.audience_id.is_some() {
                graph.set_audience(node_id, node.audience_id.clone())?;
            }
        }

        info!(steps = graph.len(), revision = graph.revision(), "Imported journey draft");
        Ok((graph, ids))
    }
}
