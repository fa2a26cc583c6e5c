use std::collections::HashMap;

use tracing::{debug, info};

use campaign_core::event_bus::GraphDelta;
use campaign_core::{FlowError, FlowResult, NodeId, TriggerId};

use crate::graph::JourneyGraph;
use crate::types::Trigger;

/// Graph-wide store of branches, keyed by globally unique id. Each step keeps
/// the ordered ids of the branches it owns; the registry holds the branches.
#[derive(Debug, Clone, Default)]
pub struct TriggerRegistry {
    triggers: HashMap<TriggerId, Trigger>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self {
            triggers: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, source: NodeId) -> TriggerId {
        let mut id = TriggerId::new();
        while self.triggers.contains_key(&id) {
            id = TriggerId::new();
        }
        self.triggers.insert(
            id,
            Trigger {
                id,
                source_node_id: source,
                target_node_id: None,
                label: None,
            },
        );
        id
    }

    pub(crate) fn remove(&mut self, id: TriggerId) -> Option<Trigger> {
        self.triggers.remove(&id)
    }

    pub fn get(&self, id: TriggerId) -> Option<&Trigger> {
        self.triggers.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: TriggerId) -> Option<&mut Trigger> {
        self.triggers.get_mut(&id)
    }

    pub fn contains(&self, id: TriggerId) -> bool {
        self.triggers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> + '_ {
        self.triggers.values()
    }

    /// Branches pointing at `node`, from any owner, sorted by id.
    pub fn targeting(&self, node: NodeId) -> Vec<TriggerId> {
        let mut ids: Vec<TriggerId> = self
            .triggers
            .values()
            .filter(|t| t.target_node_id == Some(node))
            .map(|t| t.id)
            .collect();
        ids.sort();
        ids
    }

    /// Branches without a target, sorted by id.
    pub fn dangling(&self) -> Vec<TriggerId> {
        let mut ids: Vec<TriggerId> = self
            .triggers
            .values()
            .filter(|t| t.is_dangling())
            .map(|t| t.id)
            .collect();
        ids.sort();
        ids
    }
}

impl JourneyGraph {
    /// Adds a dangling branch to `node_id`.
    pub fn add_trigger(&mut self, node_id: NodeId) -> FlowResult<TriggerId> {
        let limit = self.settings.max_triggers_per_node;
        let node = self.node_mut(node_id)?;
        if node.is_exit() {
            return Err(FlowError::ExitStepBranch(node_id));
        }
        if let Some(limit) = limit {
            if node.triggers.len() >= limit {
                return Err(FlowError::TriggerLimitExceeded { node_id, limit });
            }
        }

        let trigger_id = self.triggers.insert(node_id);
        self.node_mut(node_id)?.triggers.push(trigger_id);
        info!(node_id = %node_id, trigger_id = %trigger_id, "Added branch");
        self.emit(GraphDelta::TriggerAdded {
            trigger_id,
            node_id,
        });
        Ok(trigger_id)
    }

    /// Deletes a branch from its owner.
    pub fn remove_trigger(&mut self, trigger_id: TriggerId) -> FlowResult<()> {
        let trigger = self
            .triggers
            .remove(trigger_id)
            .ok_or(FlowError::TriggerNotFound(trigger_id))?;
        let node_id = trigger.source_node_id;
        if let Some(owner) = self.nodes.get_mut(&node_id) {
            owner.triggers.retain(|t| *t != trigger_id);
        }
        if self.pending_connection == Some(trigger_id) {
            self.pending_connection = None;
        }
        info!(node_id = %node_id, trigger_id = %trigger_id, "Removed branch");
        self.emit(GraphDelta::TriggerRemoved {
            trigger_id,
            node_id,
        });
        Ok(())
    }

    /// Changes the display label of a branch. Identity and edges are untouched.
    pub fn set_trigger_label(
        &mut self,
        trigger_id: TriggerId,
        label: Option<String>,
    ) -> FlowResult<()> {
        let trigger = self
            .triggers
            .get_mut(trigger_id)
            .ok_or(FlowError::TriggerNotFound(trigger_id))?;
        if trigger.label == label {
            return Ok(());
        }
        trigger.label = label.clone();
        self.emit(GraphDelta::TriggerLabelChanged { trigger_id, label });
        Ok(())
    }

    // ─── Connection drag ────────────────────────────────────────────────

    /// Starts dragging a connection out of `trigger_id`.
    pub fn begin_connection(&mut self, trigger_id: TriggerId) -> FlowResult<()> {
        if !self.triggers.contains(trigger_id) {
            return Err(FlowError::TriggerNotFound(trigger_id));
        }
        debug!(trigger_id = %trigger_id, "Connection drag started");
        self.pending_connection = Some(trigger_id);
        Ok(())
    }

    pub fn pending_connection(&self) -> Option<TriggerId> {
        self.pending_connection
    }

    /// A step can receive the dragged connection iff a drag is in progress
    /// and the step is not the one the drag started from.
    pub fn can_accept_connection(&self, node_id: NodeId) -> bool {
        let Some(trigger) = self.pending_connection.and_then(|t| self.triggers.get(t)) else {
            return false;
        };
        self.nodes.contains_key(&node_id) && trigger.source_node_id != node_id
    }

    /// Drops the dragged connection on `target`. The drag ends either way.
    pub fn complete_connection(&mut self, target: NodeId) -> FlowResult<TriggerId> {
        let trigger_id = self
            .pending_connection
            .take()
            .ok_or(FlowError::NoPendingConnection)?;
        self.connect_trigger(trigger_id, target)?;
        Ok(trigger_id)
    }

    pub fn cancel_connection(&mut self) {
        if let Some(trigger_id) = self.pending_connection.take() {
            debug!(trigger_id = %trigger_id, "Connection drag cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::Position;
    use campaign_core::StepKind;

    use crate::graph::GraphSettings;

    #[test]
    fn test_ids_are_globally_unique() {
        let mut graph = JourneyGraph::new();
        let n1 = graph.add_node(StepKind::Audience, Position::default());
        let n2 = graph.add_node(StepKind::Audience, Position::default());
        let a = graph.add_trigger(n1).unwrap();
        let b = graph.add_trigger(n1).unwrap();
        let c = graph.add_trigger(n2).unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(graph.node(n1).unwrap().triggers(), &[a, b]);
        assert_eq!(graph.trigger(c).unwrap().source_node_id, n2);
    }

    #[test]
    fn test_add_trigger_unknown_or_exit() {
        let mut graph = JourneyGraph::new();
        assert!(matches!(
            graph.add_trigger(NodeId::new()),
            Err(FlowError::NodeNotFound(_))
        ));

        let _entry = graph.add_node(StepKind::Audience, Position::default());
        let exit = graph.add_node(StepKind::Exit, Position::default());
        assert!(matches!(
            graph.add_trigger(exit),
            Err(FlowError::ExitStepBranch(_))
        ));
    }

    #[test]
    fn test_trigger_limit() {
        let mut graph = JourneyGraph::new().with_settings(GraphSettings {
            max_triggers_per_node: Some(2),
            ..GraphSettings::default()
        });
        let n1 = graph.add_node(StepKind::Audience, Position::default());
        graph.add_trigger(n1).unwrap();
        graph.add_trigger(n1).unwrap();
        assert!(matches!(
            graph.add_trigger(n1),
            Err(FlowError::TriggerLimitExceeded { limit: 2, .. })
        ));
        assert_eq!(graph.node(n1).unwrap().triggers().len(), 2);
    }

    #[test]
    fn test_remove_trigger() {
        let mut graph = JourneyGraph::new();
        let n1 = graph.add_node(StepKind::Audience, Position::default());
        let t1 = graph.add_trigger(n1).unwrap();

        graph.remove_trigger(t1).unwrap();
        assert!(graph.trigger(t1).is_none());
        assert!(graph.node(n1).unwrap().triggers().is_empty());
        assert!(matches!(
            graph.remove_trigger(t1),
            Err(FlowError::TriggerNotFound(_))
        ));
    }

    #[test]
    fn test_label_does_not_touch_edges() {
        let mut graph = JourneyGraph::new();
        let n1 = graph.add_node(StepKind::Audience, Position::default());
        let n2 = graph.add_node(StepKind::Exit, Position::default());
        let t1 = graph.add_trigger(n1).unwrap();
        graph.connect_trigger(t1, n2).unwrap();

        graph
            .set_trigger_label(t1, Some("opened email".to_string()))
            .unwrap();
        let trigger = graph.trigger(t1).unwrap();
        assert_eq!(trigger.id, t1);
        assert_eq!(trigger.target_node_id, Some(n2));
        assert_eq!(trigger.label.as_deref(), Some("opened email"));
    }

    #[test]
    fn test_connection_drag() {
        let mut graph = JourneyGraph::new();
        let n1 = graph.add_node(StepKind::Audience, Position::default());
        let n2 = graph.add_node(StepKind::Audience, Position::default());
        let t1 = graph.add_trigger(n1).unwrap();

        assert!(!graph.can_accept_connection(n2));
        graph.begin_connection(t1).unwrap();
        assert!(graph.can_accept_connection(n2));
        assert!(!graph.can_accept_connection(n1));
        assert!(graph.node_view(n2).unwrap().accepts_connection);

        assert_eq!(graph.complete_connection(n2).unwrap(), t1);
        assert_eq!(graph.pending_connection(), None);
        assert_eq!(graph.trigger(t1).unwrap().target_node_id, Some(n2));

        assert!(matches!(
            graph.complete_connection(n2),
            Err(FlowError::NoPendingConnection)
        ));
    }

    #[test]
    fn test_removing_dragged_trigger_cancels_drag() {
        let mut graph = JourneyGraph::new();
        let n1 = graph.add_node(StepKind::Audience, Position::default());
        let t1 = graph.add_trigger(n1).unwrap();
        graph.begin_connection(t1).unwrap();
        graph.remove_trigger(t1).unwrap();
        assert_eq!(graph.pending_connection(), None);

        let t2 = graph.add_trigger(n1).unwrap();
        graph.begin_connection(t2).unwrap();
        graph.cancel_connection();
        assert_eq!(graph.pending_connection(), None);
    }
}
