use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use campaign_core::config::{ChannelRules, ResolverConfig};
use campaign_core::event_bus::{make_event, GraphDelta, GraphEventSink};
use campaign_core::types::{Position, ResolutionStatus};
use campaign_core::{
    AppConfig, AudienceId, AudienceMetadata, FlowError, FlowResult, NodeId, ResolveError, StepKind,
    TriggerId,
};

use crate::node::{Node, ResolutionOutcome, ResolutionTicket};
use crate::triggers::TriggerRegistry;
use crate::types::{MessageView, NodeView, Trigger, TriggerView};

/// Editor settings drawn from [`AppConfig`].
#[derive(Debug, Clone, Default)]
pub struct GraphSettings {
    pub channel_rules: ChannelRules,
    pub resolver: ResolverConfig,
    pub max_triggers_per_node: Option<usize>,
}

impl GraphSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            channel_rules: config.channels.clone(),
            resolver: config.resolver.clone(),
            max_triggers_per_node: config.graph.max_triggers_per_node,
        }
    }
}

/// The journey graph: steps, their branches, and the designated entry.
///
/// Every mutation is synchronous and all-or-nothing: it either succeeds with
/// all invariants holding, or returns an error and leaves the graph as it was.
/// Each successful mutation emits one or more [`GraphDelta`]s to the sink.
pub struct JourneyGraph {
    pub(crate) nodes: HashMap<NodeId, Node>,
    /// Creation order, for stable projections.
    pub(crate) order: Vec<NodeId>,
    pub(crate) entry: Option<NodeId>,
    pub(crate) triggers: TriggerRegistry,
    pub(crate) pending_connection: Option<TriggerId>,
    pub(crate) pending_resolutions: Vec<ResolutionTicket>,
    pub(crate) revision: u64,
    pub(crate) settings: GraphSettings,
    event_sink: Arc<dyn GraphEventSink>,
}

impl std::fmt::Debug for JourneyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JourneyGraph")
            .field("nodes", &self.nodes.len())
            .field("triggers", &self.triggers.len())
            .field("entry", &self.entry)
            .field("revision", &self.revision)
            .finish()
    }
}

impl JourneyGraph {
    /// Creates an empty graph with default settings and no observers.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            entry: None,
            triggers: TriggerRegistry::new(),
            pending_connection: None,
            pending_resolutions: Vec::new(),
            revision: 0,
            settings: GraphSettings::default(),
            event_sink: campaign_core::event_bus::noop_sink(),
        }
    }

    pub fn with_settings(mut self, settings: GraphSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attach a sink for graph change notifications.
    pub fn with_event_sink(mut self, sink: Arc<dyn GraphEventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub(crate) fn emit(&mut self, delta: GraphDelta) {
        self.revision += 1;
        self.event_sink.emit(make_event(self.revision, delta));
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub fn entry(&self) -> Option<NodeId> {
        self.entry
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Steps in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&Trigger> {
        self.triggers.get(id)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> + '_ {
        self.triggers.iter()
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> FlowResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FlowError::NodeNotFound(id))
    }

    // ─── Structural mutations ───────────────────────────────────────────

    /// Adds a step. The first step added becomes the entry.
    pub fn add_node(&mut self, kind: StepKind, position: Position) -> NodeId {
        let node = Node::new(kind, position);
        let id = node.id();
        self.nodes.insert(id, node);
        self.order.push(id);
        info!(node_id = %id, ?kind, "Added journey step");
        self.emit(GraphDelta::NodeAdded {
            node_id: id,
            step_kind: kind,
        });

        if self.entry.is_none() {
            self.entry = Some(id);
            self.emit(GraphDelta::EntryChanged { entry: Some(id) });
        }
        id
    }

    /// Removes a step. Branches it owned are deleted; branches elsewhere that
    /// pointed at it become dangling. The entry can only be removed when it is
    /// the last step.
    pub fn remove_node(&mut self, id: NodeId) -> FlowResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(FlowError::NodeNotFound(id));
        }
        if self.entry == Some(id) && self.nodes.len() > 1 {
            warn!(node_id = %id, "Refusing to remove entry step");
            return Err(FlowError::EntryNodeProtected(id));
        }

        let node = self.nodes.remove(&id).ok_or(FlowError::NodeNotFound(id))?;
        self.order.retain(|n| *n != id);

        let mut removed_triggers = Vec::with_capacity(node.triggers().len());
        for trigger_id in node.triggers() {
            if self.triggers.remove(*trigger_id).is_some() {
                removed_triggers.push(*trigger_id);
            }
        }
        if self
            .pending_connection
            .is_some_and(|t| removed_triggers.contains(&t))
        {
            self.pending_connection = None;
        }

        let detached_triggers = self.triggers.targeting(id);
        for trigger_id in &detached_triggers {
            if let Some(trigger) = self.triggers.get_mut(*trigger_id) {
                trigger.target_node_id = None;
            }
        }

        self.pending_resolutions.retain(|t| t.node_id != id);

        info!(
            node_id = %id,
            removed = removed_triggers.len(),
            detached = detached_triggers.len(),
            "Removed journey step"
        );
        self.emit(GraphDelta::NodeRemoved {
            node_id: id,
            removed_triggers,
            detached_triggers,
        });

        if self.entry == Some(id) {
            self.entry = None;
            self.emit(GraphDelta::EntryChanged { entry: None });
        }
        Ok(())
    }

    /// Designates a different entry step.
    pub fn set_entry(&mut self, id: NodeId) -> FlowResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(FlowError::NodeNotFound(id));
        }
        if self.entry == Some(id) {
            return Ok(());
        }
        info!(node_id = %id, previous = ?self.entry, "Changed entry step");
        self.entry = Some(id);
        self.emit(GraphDelta::EntryChanged { entry: Some(id) });
        Ok(())
    }

    /// Points a branch at `target`.
    ///
    /// Retargeting an already-connected branch back onto the entry is refused
    /// when that would strand steps that are currently reachable.
    pub fn connect_trigger(&mut self, trigger_id: TriggerId, target: NodeId) -> FlowResult<()> {
        let trigger = self
            .triggers
            .get(trigger_id)
            .ok_or(FlowError::TriggerNotFound(trigger_id))?;
        if !self.nodes.contains_key(&target) {
            return Err(FlowError::NodeNotFound(target));
        }
        if trigger.target_node_id == Some(target) {
            return Ok(());
        }

        let source = trigger.source_node_id;
        if self.entry == Some(target) && trigger.target_node_id.is_some() {
            let before = self.reachable_with(None);
            let after = self.reachable_with(Some((trigger_id, Some(target))));
            let mut stranded: Vec<NodeId> = before.difference(&after).copied().collect();
            if !stranded.is_empty() {
                stranded.sort();
                warn!(
                    trigger_id = %trigger_id,
                    stranded = stranded.len(),
                    "Refusing to loop branch back to entry"
                );
                return Err(FlowError::SelfLoopOnEntry {
                    trigger_id,
                    stranded,
                });
            }
        }

        if let Some(trigger) = self.triggers.get_mut(trigger_id) {
            trigger.target_node_id = Some(target);
        }
        debug!(trigger_id = %trigger_id, source = %source, target = %target, "Connected branch");
        self.emit(GraphDelta::TriggerConnected {
            trigger_id,
            source,
            target,
        });
        Ok(())
    }

    /// Clears a branch's target. Disconnecting an already dangling branch is
    /// a no-op.
    pub fn disconnect_trigger(&mut self, trigger_id: TriggerId) -> FlowResult<()> {
        let trigger = self
            .triggers
            .get_mut(trigger_id)
            .ok_or(FlowError::TriggerNotFound(trigger_id))?;
        if trigger.target_node_id.take().is_none() {
            return Ok(());
        }
        let source = trigger.source_node_id;
        debug!(trigger_id = %trigger_id, "Disconnected branch");
        self.emit(GraphDelta::TriggerDisconnected { trigger_id, source });
        Ok(())
    }

    pub fn move_node(&mut self, id: NodeId, position: Position) -> FlowResult<()> {
        let node = self.node_mut(id)?;
        if node.position() == position {
            return Ok(());
        }
        node.set_position(position);
        self.emit(GraphDelta::NodeMoved {
            node_id: id,
            position,
        });
        Ok(())
    }

    // ─── Flags ──────────────────────────────────────────────────────────

    /// Selects `id` exclusively, or clears its selection.
    pub fn set_selected(&mut self, id: NodeId, selected: bool) -> FlowResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(FlowError::NodeNotFound(id));
        }
        let mut changed = Vec::new();
        for node in self.nodes.values_mut() {
            let want = if node.id() == id {
                selected
            } else {
                // Selecting one step deselects the rest.
                node.flags.selected && !selected
            };
            if node.flags.selected != want {
                node.flags.selected = want;
                changed.push(node.id());
            }
        }
        for node_id in changed {
            self.emit(GraphDelta::FlagsChanged { node_id });
        }
        Ok(())
    }

    pub fn set_hidden(&mut self, id: NodeId, hidden: bool) -> FlowResult<()> {
        let node = self.node_mut(id)?;
        if node.flags.hidden == hidden {
            return Ok(());
        }
        node.flags.hidden = hidden;
        self.emit(GraphDelta::FlagsChanged { node_id: id });
        Ok(())
    }

    // ─── Audience resolution ────────────────────────────────────────────

    /// Assigns or clears a step's audience. A new audience queues a lookup
    /// for the refresh coordinator; nothing here waits on the resolver.
    pub fn set_audience(&mut self, id: NodeId, audience_id: Option<AudienceId>) -> FlowResult<()> {
        let node = self.node_mut(id)?;
        let before = node.token();
        let ticket = node.assign_audience(audience_id.clone())?;
        if node.token() == before {
            return Ok(());
        }
        let status = node.resolution_status();

        info!(node_id = %id, audience_id = ?audience_id, "Assigned audience");
        self.emit(GraphDelta::AudienceAssigned {
            node_id: id,
            audience_id,
        });
        if let Some(status) = status {
            self.emit(GraphDelta::ResolutionChanged {
                node_id: id,
                status,
            });
        }
        if let Some(ticket) = ticket {
            self.pending_resolutions.push(ticket);
        }
        Ok(())
    }

    /// Re-issues the audience lookup for a step that has one.
    pub fn request_refresh(&mut self, id: NodeId) -> FlowResult<()> {
        let node = self.node_mut(id)?;
        if let Some(ticket) = node.begin_refresh()? {
            let was_flagged = std::mem::take(&mut node.flags.needs_resolution_refresh);
            debug!(node_id = %id, token = ticket.token.0, "Queued audience refresh");
            self.pending_resolutions.push(ticket);
            self.emit(GraphDelta::ResolutionChanged {
                node_id: id,
                status: ResolutionStatus::Resolving,
            });
            if was_flagged {
                self.emit(GraphDelta::FlagsChanged { node_id: id });
            }
        }
        Ok(())
    }

    /// Drains queued lookups, first turning every step flagged with
    /// `needs_resolution_refresh` into a fresh request.
    pub fn take_pending_resolutions(&mut self) -> Vec<ResolutionTicket> {
        let flagged: Vec<NodeId> = self
            .nodes()
            .filter(|n| n.flags().needs_resolution_refresh)
            .map(|n| n.id())
            .collect();
        for id in flagged {
            if let Err(err) = self.request_refresh(id) {
                warn!(node_id = %id, error = %err, "Could not queue flagged refresh");
            }
            let cleared = self
                .nodes
                .get_mut(&id)
                .is_some_and(|node| std::mem::take(&mut node.flags.needs_resolution_refresh));
            if cleared {
                self.emit(GraphDelta::FlagsChanged { node_id: id });
            }
        }
        std::mem::take(&mut self.pending_resolutions)
    }

    /// Merges a resolver response into its step. Stale responses and
    /// responses for removed steps are discarded without touching the graph.
    pub fn apply_resolution(
        &mut self,
        ticket: &ResolutionTicket,
        result: Result<AudienceMetadata, ResolveError>,
    ) -> ResolutionOutcome {
        let default_width = self.settings.resolver.default_display_width.clone();
        let Some(node) = self.nodes.get_mut(&ticket.node_id) else {
            debug!(node_id = %ticket.node_id, "Resolution for removed step discarded");
            metrics::counter!("journey.resolution.orphaned").increment(1);
            return ResolutionOutcome::Orphaned;
        };

        let outcome = match node.apply_resolution(ticket, result, &default_width) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(node_id = %ticket.node_id, error = %err, "Resolution merge rejected");
                ResolutionOutcome::Failed(err.to_string())
            }
        };

        match &outcome {
            ResolutionOutcome::Applied => {
                metrics::counter!("journey.resolution.applied").increment(1);
                info!(node_id = %ticket.node_id, audience_id = %ticket.audience_id, "Audience resolved");
                self.emit(GraphDelta::ResolutionChanged {
                    node_id: ticket.node_id,
                    status: ResolutionStatus::Resolved,
                });
            }
            ResolutionOutcome::Failed(reason) => {
                metrics::counter!("journey.resolution.failed").increment(1);
                warn!(node_id = %ticket.node_id, audience_id = %ticket.audience_id, error = %reason, "Audience resolution failed");
                self.emit(GraphDelta::ResolutionChanged {
                    node_id: ticket.node_id,
                    status: ResolutionStatus::Unresolved,
                });
            }
            ResolutionOutcome::Superseded => {
                metrics::counter!("journey.resolution.superseded").increment(1);
                debug!(
                    node_id = %ticket.node_id,
                    audience_id = %ticket.audience_id,
                    token = ticket.token.0,
                    "Superseded resolution discarded"
                );
            }
            ResolutionOutcome::Orphaned => {}
        }
        outcome
    }

    // ─── Projections ────────────────────────────────────────────────────

    /// Read-only view of a step for the canvas.
    pub fn node_view(&self, id: NodeId) -> Option<NodeView> {
        let node = self.nodes.get(&id)?;
        let placeholder = &self.settings.resolver;

        let (name, description, is_dynamic, icon_ref, display_width) = match node.kind() {
            StepKind::Exit => (
                String::new(),
                String::new(),
                false,
                None,
                placeholder.default_display_width.clone(),
            ),
            StepKind::Audience => match node.resolved() {
                Some(resolved) => (
                    resolved.name.clone(),
                    resolved.description.clone(),
                    resolved.is_dynamic,
                    resolved.icon_ref.clone(),
                    resolved.display_width.clone(),
                ),
                None => (
                    placeholder.placeholder_name.clone(),
                    placeholder.placeholder_description.clone(),
                    false,
                    None,
                    placeholder.default_display_width.clone(),
                ),
            },
        };

        let messages = node
            .messages()
            .iter()
            .map(|m| MessageView {
                channel: m.channel,
                template_id: m.template_id,
                icon: m.channel.icon(),
            })
            .collect();

        let triggers = node
            .triggers()
            .iter()
            .filter_map(|t| self.triggers.get(*t))
            .map(|t| TriggerView {
                id: t.id,
                label: t.label.clone(),
                target: t.target_node_id,
            })
            .collect();

        Some(NodeView {
            id,
            kind: node.kind(),
            position: node.position(),
            is_primary: self.entry == Some(id),
            audience_id: node.audience_id().cloned(),
            status: node.resolution_status(),
            name,
            description,
            is_dynamic,
            icon_ref,
            display_width,
            messages,
            triggers,
            flags: node.flags(),
            accepts_connection: self.can_accept_connection(id),
        })
    }

    /// Views of every step in creation order.
    pub fn views(&self) -> Vec<NodeView> {
        self.order.iter().filter_map(|id| self.node_view(*id)).collect()
    }
}

impl Default for JourneyGraph {
    fn default() -> Self {
        Self::new()
    }
}
