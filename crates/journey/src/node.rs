use serde::{Deserialize, Serialize};

use campaign_core::types::{Position, ResolutionStatus};
use campaign_core::{
    AudienceId, AudienceMetadata, Channel, FlowError, FlowResult, NodeId, ResolveError, StepKind,
    TemplateId, TriggerId,
};

use crate::state_machine::ResolutionStateMachine;
use crate::types::{Message, NodeFlags, ResolvedAudience};

/// Per-step counter stamped on every resolution request. A response is only
/// accepted while the step still carries the token it was issued with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FreshnessToken(pub u64);

impl FreshnessToken {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// An outstanding audience lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionTicket {
    pub node_id: NodeId,
    pub audience_id: AudienceId,
    pub token: FreshnessToken,
}

/// What happened to a resolver response when it was merged back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "error")]
pub enum ResolutionOutcome {
    Applied,
    /// The step moved on to a newer request before this one returned.
    Superseded,
    Failed(String),
    /// The step was removed while the lookup was in flight.
    Orphaned,
}

/// A step in the journey graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    kind: StepKind,
    position: Position,
    audience_id: Option<AudienceId>,
    resolved: Option<ResolvedAudience>,
    resolution: ResolutionStateMachine,
    token: FreshnessToken,
    last_error: Option<String>,
    pub(crate) messages: Vec<Message>,
    pub(crate) triggers: Vec<TriggerId>,
    pub(crate) flags: NodeFlags,
}

impl Node {
    pub(crate) fn new(kind: StepKind, position: Position) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            position,
            audience_id: None,
            resolved: None,
            resolution: ResolutionStateMachine::new(),
            token: FreshnessToken::default(),
            last_error: None,
            messages: Vec::new(),
            triggers: Vec::new(),
            flags: NodeFlags::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn is_exit(&self) -> bool {
        self.kind == StepKind::Exit
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn audience_id(&self) -> Option<&AudienceId> {
        self.audience_id.as_ref()
    }

    pub fn resolved(&self) -> Option<&ResolvedAudience> {
        self.resolved.as_ref()
    }

    /// `None` for exit steps, which have no resolution lifecycle.
    pub fn resolution_status(&self) -> Option<ResolutionStatus> {
        match self.kind {
            StepKind::Audience => Some(self.resolution.state()),
            StepKind::Exit => None,
        }
    }

    pub fn token(&self) -> FreshnessToken {
        self.token
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, channel: Channel) -> Option<&Message> {
        self.messages.iter().find(|m| m.channel == channel)
    }

    pub fn triggers(&self) -> &[TriggerId] {
        &self.triggers
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Assigns or clears the audience. Returns a ticket when a lookup has to
    /// be issued. Reassigning the audience a step is already resolving or has
    /// resolved is a no-op; reassigning it after a failure retries.
    pub(crate) fn assign_audience(
        &mut self,
        audience_id: Option<AudienceId>,
    ) -> FlowResult<Option<ResolutionTicket>> {
        if self.is_exit() {
            return Err(FlowError::NotAnAudienceStep(self.id));
        }

        match audience_id {
            None => {
                if self.audience_id.is_none() {
                    return Ok(None);
                }
                self.resolution.reset()?;
                self.audience_id = None;
                self.resolved = None;
                self.last_error = None;
                // Invalidate anything still in flight.
                self.token = self.token.next();
                Ok(None)
            }
            Some(audience_id) => {
                let unchanged = self.audience_id.as_ref() == Some(&audience_id);
                let settled_or_pending = matches!(
                    self.resolution.state(),
                    ResolutionStatus::Resolving | ResolutionStatus::Resolved
                );
                if unchanged && settled_or_pending {
                    return Ok(None);
                }

                self.resolution.restart()?;
                self.audience_id = Some(audience_id.clone());
                self.resolved = None;
                self.last_error = None;
                Ok(Some(self.issue_ticket(audience_id)))
            }
        }
    }

    /// Re-issues the lookup for the current audience. The current snapshot
    /// stays visible until the new one lands, since it matches the same id.
    pub(crate) fn begin_refresh(&mut self) -> FlowResult<Option<ResolutionTicket>> {
        let Some(audience_id) = self.audience_id.clone() else {
            return Ok(None);
        };
        if self.is_exit() {
            return Ok(None);
        }
        self.resolution.restart()?;
        self.last_error = None;
        Ok(Some(self.issue_ticket(audience_id)))
    }

    fn issue_ticket(&mut self, audience_id: AudienceId) -> ResolutionTicket {
        self.token = self.token.next();
        ResolutionTicket {
            node_id: self.id,
            audience_id,
            token: self.token,
        }
    }

    /// Merges a resolver response, gated by the ticket's freshness.
    pub(crate) fn apply_resolution(
        &mut self,
        ticket: &ResolutionTicket,
        result: Result<AudienceMetadata, ResolveError>,
        default_width: &str,
    ) -> FlowResult<ResolutionOutcome> {
        let fresh = ticket.token == self.token
            && self.audience_id.as_ref() == Some(&ticket.audience_id)
            && self.resolution.state() == ResolutionStatus::Resolving;
        if !fresh {
            return Ok(ResolutionOutcome::Superseded);
        }

        match result {
            Ok(meta) => {
                self.resolution.transition(ResolutionStatus::Resolved)?;
                self.resolved = Some(ResolvedAudience::from_metadata(
                    ticket.audience_id.clone(),
                    meta,
                    default_width,
                ));
                Ok(ResolutionOutcome::Applied)
            }
            Err(err) => {
                self.resolution.transition(ResolutionStatus::Unresolved)?;
                self.resolved = None;
                self.last_error = Some(err.to_string());
                Ok(ResolutionOutcome::Failed(err.to_string()))
            }
        }
    }

    /// Binds `template_id` to `channel`, replacing an existing binding or
    /// appending a new one. Returns `false` if nothing changed.
    pub(crate) fn upsert_message(&mut self, channel: Channel, template_id: Option<TemplateId>) -> bool {
        match self.messages.iter_mut().find(|m| m.channel == channel) {
            Some(existing) if existing.template_id == template_id => false,
            Some(existing) => {
                existing.template_id = template_id;
                true
            }
            None => {
                self.messages.push(Message {
                    channel,
                    template_id,
                });
                true
            }
        }
    }

    pub(crate) fn remove_message(&mut self, channel: Channel) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.channel != channel);
        self.messages.len() != before
    }

    /// Removes every binding to `template_id`; returns the affected channels.
    pub(crate) fn remove_template(&mut self, template_id: TemplateId) -> Vec<Channel> {
        let removed: Vec<Channel> = self
            .messages
            .iter()
            .filter(|m| m.template_id == Some(template_id))
            .map(|m| m.channel)
            .collect();
        self.messages.retain(|m| m.template_id != Some(template_id));
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> AudienceMetadata {
        AudienceMetadata {
            name: name.to_string(),
            description: format!("{name} description"),
            is_dynamic: true,
            icon_ref: None,
            display_width: None,
        }
    }

    #[test]
    fn test_new_audience_step_is_unresolved() {
        let node = Node::new(StepKind::Audience, Position::default());
        assert_eq!(node.resolution_status(), Some(ResolutionStatus::Unresolved));
        assert!(node.resolved().is_none());
    }

    #[test]
    fn test_exit_step_rejects_audience() {
        let mut node = Node::new(StepKind::Exit, Position::default());
        assert!(matches!(
            node.assign_audience(Some("a".into())),
            Err(FlowError::NotAnAudienceStep(_))
        ));
        assert_eq!(node.resolution_status(), None);
    }

    #[test]
    fn test_assign_and_apply() {
        let mut node = Node::new(StepKind::Audience, Position::default());
        let ticket = node.assign_audience(Some("a".into())).unwrap().unwrap();
        assert_eq!(node.resolution_status(), Some(ResolutionStatus::Resolving));

        let outcome = node.apply_resolution(&ticket, Ok(meta("A")), "350px").unwrap();
        assert_eq!(outcome, ResolutionOutcome::Applied);
        assert_eq!(node.resolution_status(), Some(ResolutionStatus::Resolved));
        let resolved = node.resolved().unwrap();
        assert_eq!(resolved.name, "A");
        assert_eq!(resolved.display_width, "350px");
    }

    #[test]
    fn test_superseded_response_is_discarded_in_any_order() {
        let mut node = Node::new(StepKind::Audience, Position::default());
        let ticket_a = node.assign_audience(Some("a".into())).unwrap().unwrap();
        let ticket_b = node.assign_audience(Some("b".into())).unwrap().unwrap();
        assert!(ticket_b.token > ticket_a.token);

        // B lands first, then the late A.
        assert_eq!(
            node.apply_resolution(&ticket_b, Ok(meta("B")), "350px").unwrap(),
            ResolutionOutcome::Applied
        );
        assert_eq!(
            node.apply_resolution(&ticket_a, Ok(meta("A")), "350px").unwrap(),
            ResolutionOutcome::Superseded
        );
        assert_eq!(node.resolved().unwrap().name, "B");
    }

    #[test]
    fn test_same_audience_reassignment_is_noop_until_failure() {
        let mut node = Node::new(StepKind::Audience, Position::default());
        let ticket = node.assign_audience(Some("a".into())).unwrap().unwrap();
        assert!(node.assign_audience(Some("a".into())).unwrap().is_none());

        let outcome = node
            .apply_resolution(&ticket, Err(ResolveError::Transient("boom".into())), "350px")
            .unwrap();
        assert!(matches!(outcome, ResolutionOutcome::Failed(_)));
        assert_eq!(node.resolution_status(), Some(ResolutionStatus::Unresolved));
        assert!(node.last_error().is_some());

        // Explicit reassignment is the retry path.
        let retry = node.assign_audience(Some("a".into())).unwrap();
        assert!(retry.is_some());
        assert!(node.last_error().is_none());
    }

    #[test]
    fn test_clearing_audience_invalidates_in_flight() {
        let mut node = Node::new(StepKind::Audience, Position::default());
        let ticket = node.assign_audience(Some("a".into())).unwrap().unwrap();
        node.assign_audience(None).unwrap();
        assert_eq!(node.resolution_status(), Some(ResolutionStatus::Unresolved));
        assert_eq!(
            node.apply_resolution(&ticket, Ok(meta("A")), "350px").unwrap(),
            ResolutionOutcome::Superseded
        );
        assert!(node.resolved().is_none());
    }

    #[test]
    fn test_refresh_keeps_snapshot_until_new_one_lands() {
        let mut node = Node::new(StepKind::Audience, Position::default());
        let first = node.assign_audience(Some("a".into())).unwrap().unwrap();
        node.apply_resolution(&first, Ok(meta("A")), "350px").unwrap();

        let refresh = node.begin_refresh().unwrap().unwrap();
        assert_eq!(node.resolution_status(), Some(ResolutionStatus::Resolving));
        assert_eq!(node.resolved().unwrap().name, "A");

        node.apply_resolution(&refresh, Ok(meta("A2")), "350px").unwrap();
        assert_eq!(node.resolved().unwrap().name, "A2");
    }

    #[test]
    fn test_message_upsert_and_remove() {
        let mut node = Node::new(StepKind::Audience, Position::default());
        assert!(node.upsert_message(Channel::Email, Some(7)));
        assert!(node.upsert_message(Channel::Sms, None));
        assert!(node.upsert_message(Channel::Email, Some(9)));
        assert!(!node.upsert_message(Channel::Email, Some(9)));

        assert_eq!(node.messages().len(), 2);
        assert_eq!(node.messages()[0].channel, Channel::Email);
        assert_eq!(node.message(Channel::Email).unwrap().template_id, Some(9));

        assert_eq!(node.remove_template(9), vec![Channel::Email]);
        assert!(node.remove_message(Channel::Sms));
        assert!(!node.remove_message(Channel::Sms));
        assert!(node.messages().is_empty());
    }
}
