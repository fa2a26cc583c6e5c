//! Graph change notifications. Every editor mutation emits an immutable
//! delta so presentation observers can update incrementally.
//!
//! Editors accept an `Arc<dyn GraphEventSink>`; the canvas subscribes through
//! a [`BroadcastSink`], tests capture through a [`CaptureSink`].

use crate::types::{
    AudienceId, Channel, NodeId, Position, ResolutionStatus, StepKind, TemplateId, TriggerId,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What changed in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GraphDelta {
    NodeAdded {
        node_id: NodeId,
        step_kind: StepKind,
    },
    NodeRemoved {
        node_id: NodeId,
        removed_triggers: Vec<TriggerId>,
        detached_triggers: Vec<TriggerId>,
    },
    EntryChanged {
        entry: Option<NodeId>,
    },
    NodeMoved {
        node_id: NodeId,
        position: Position,
    },
    TriggerAdded {
        trigger_id: TriggerId,
        node_id: NodeId,
    },
    TriggerRemoved {
        trigger_id: TriggerId,
        node_id: NodeId,
    },
    TriggerConnected {
        trigger_id: TriggerId,
        source: NodeId,
        target: NodeId,
    },
    TriggerDisconnected {
        trigger_id: TriggerId,
        source: NodeId,
    },
    TriggerLabelChanged {
        trigger_id: TriggerId,
        label: Option<String>,
    },
    MessageAssigned {
        node_id: NodeId,
        channel: Channel,
        template_id: Option<TemplateId>,
    },
    MessageDetached {
        node_id: NodeId,
        channel: Channel,
    },
    AudienceAssigned {
        node_id: NodeId,
        audience_id: Option<AudienceId>,
    },
    ResolutionChanged {
        node_id: NodeId,
        status: ResolutionStatus,
    },
    FlagsChanged {
        node_id: NodeId,
    },
}

impl GraphDelta {
    /// Whether the delta changes nodes or edges, as opposed to derived data.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            GraphDelta::NodeAdded { .. }
                | GraphDelta::NodeRemoved { .. }
                | GraphDelta::EntryChanged { .. }
                | GraphDelta::TriggerAdded { .. }
                | GraphDelta::TriggerRemoved { .. }
                | GraphDelta::TriggerConnected { .. }
                | GraphDelta::TriggerDisconnected { .. }
        )
    }
}

/// A delta stamped with the graph revision it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEvent {
    pub event_id: Uuid,
    pub revision: u64,
    pub delta: GraphDelta,
    pub timestamp: DateTime<Utc>,
}

/// Receives graph events. Implementations must not call back into the graph.
pub trait GraphEventSink: Send + Sync {
    fn emit(&self, event: GraphEvent);
}

/// No-op sink for tests and editors nobody observes.
pub struct NoOpSink;

impl GraphEventSink for NoOpSink {
    fn emit(&self, _event: GraphEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<GraphEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<GraphEvent> {
        self.events.lock().clone()
    }

    pub fn deltas(&self) -> Vec<GraphDelta> {
        self.events
            .lock()
            .iter()
            .map(|e| e.delta.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_matching(&self, pred: impl Fn(&GraphDelta) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| pred(&e.delta))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl GraphEventSink for CaptureSink {
    fn emit(&self, event: GraphEvent) {
        self.events.lock().push(event);
    }
}

/// Fan-out sink backed by a tokio broadcast channel. Slow subscribers lag
/// and see `RecvError::Lagged`; emitting never blocks the editor.
pub struct BroadcastSink {
    tx: broadcast::Sender<GraphEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl GraphEventSink for BroadcastSink {
    fn emit(&self, event: GraphEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

/// Convenience builder for creating a `GraphEvent`.
pub fn make_event(revision: u64, delta: GraphDelta) -> GraphEvent {
    GraphEvent {
        event_id: Uuid::new_v4(),
        revision,
        delta,
        timestamp: Utc::now(),
    }
}

/// Convenience: a sink that drops everything.
pub fn noop_sink() -> Arc<dyn GraphEventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        let node_id = NodeId::new();
        sink.emit(make_event(
            1,
            GraphDelta::NodeAdded {
                node_id,
                step_kind: StepKind::Audience,
            },
        ));
        sink.emit(make_event(
            2,
            GraphDelta::MessageDetached {
                node_id,
                channel: Channel::Sms,
            },
        ));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_matching(GraphDelta::is_structural), 1);

        let events = sink.events();
        assert_eq!(events[0].revision, 1);
        assert!(matches!(
            events[1].delta,
            GraphDelta::MessageDetached { channel: Channel::Sms, .. }
        ));

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(make_event(1, GraphDelta::EntryChanged { entry: None }));
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        // Emitting before anyone subscribes is silently dropped.
        sink.emit(make_event(1, GraphDelta::EntryChanged { entry: None }));

        let mut rx = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 1);

        let node_id = NodeId::new();
        sink.emit(make_event(
            2,
            GraphDelta::EntryChanged {
                entry: Some(node_id),
            },
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.revision, 2);
        assert_eq!(
            event.delta,
            GraphDelta::EntryChanged {
                entry: Some(node_id)
            }
        );
    }

    #[test]
    fn test_delta_serializes_with_kind_tag() {
        let json = serde_json::to_value(GraphDelta::EntryChanged { entry: None }).unwrap();
        assert_eq!(json["kind"], "entry_changed");
    }
}
