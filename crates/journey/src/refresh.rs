//! Asynchronous audience refresh.
//!
//! Graph edits stay synchronous. Each edit that queues a lookup hands its
//! tickets to a spawned task, which calls the resolver without holding the
//! graph lock and merges the response back under the lock. Freshness tokens
//! on the tickets make the merge order-independent.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use campaign_core::{AudienceId, FlowResult, NodeId};
use campaign_segmentation::AudienceResolver;

use crate::graph::JourneyGraph;
use crate::node::{ResolutionOutcome, ResolutionTicket};

/// The graph shared between the editor and in-flight lookups.
pub type SharedGraph = Arc<Mutex<JourneyGraph>>;

/// A finished lookup and what became of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub ticket: ResolutionTicket,
    pub outcome: ResolutionOutcome,
}

/// Drives audience lookups for a [`JourneyGraph`].
#[derive(Clone)]
pub struct RefreshCoordinator {
    graph: SharedGraph,
    resolver: Arc<dyn AudienceResolver>,
    in_flight: Arc<Mutex<Vec<JoinHandle<ResolutionReport>>>>,
}

impl RefreshCoordinator {
    pub fn new(graph: JourneyGraph, resolver: Arc<dyn AudienceResolver>) -> Self {
        Self {
            graph: Arc::new(Mutex::new(graph)),
            resolver,
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn graph(&self) -> SharedGraph {
        self.graph.clone()
    }

    pub fn read<T>(&self, f: impl FnOnce(&JourneyGraph) -> T) -> T {
        f(&self.graph.lock())
    }

    /// Runs one edit under the lock, then dispatches whatever lookups it
    /// queued. Must be called from within a Tokio runtime.
    pub fn edit<T>(&self, f: impl FnOnce(&mut JourneyGraph) -> T) -> T {
        let (out, tickets) = {
            let mut graph = self.graph.lock();
            let out = f(&mut graph);
            (out, graph.take_pending_resolutions())
        };
        self.dispatch(tickets);
        out
    }

    pub fn set_audience(&self, node_id: NodeId, audience_id: Option<AudienceId>) -> FlowResult<()> {
        self.edit(|graph| graph.set_audience(node_id, audience_id))
    }

    pub fn request_refresh(&self, node_id: NodeId) -> FlowResult<()> {
        self.edit(|graph| graph.request_refresh(node_id))
    }

    /// Dispatches lookups queued by edits made directly on [`Self::graph`].
    /// Returns how many were started.
    pub fn pump(&self) -> usize {
        let tickets = self.graph.lock().take_pending_resolutions();
        let count = tickets.len();
        self.dispatch(tickets);
        count
    }

    /// Lookups started and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Handles still held, finished or not.
    pub(crate) fn retained(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Waits until no lookup is outstanding and returns the reports of every
    /// lookup still held, in dispatch order. Lookups that had already finished
    /// when a later edit was dispatched are reaped and not reported.
    pub async fn settle(&self) -> Vec<ResolutionReport> {
        let mut reports = Vec::new();
        loop {
            let handles = std::mem::take(&mut *self.in_flight.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                match handle.await {
                    Ok(report) => reports.push(report),
                    Err(err) => error!(error = %err, "Audience lookup task failed"),
                }
            }
        }
        reports
    }

    fn dispatch(&self, tickets: Vec<ResolutionTicket>) {
        if tickets.is_empty() {
            return;
        }
        let mut in_flight = self.in_flight.lock();
        let before = in_flight.len();
        in_flight.retain(|handle| !handle.is_finished());
        if in_flight.len() < before {
            debug!(reaped = before - in_flight.len(), "Reaped finished audience lookups");
        }
        for ticket in tickets {
            debug!(
                node_id = %ticket.node_id,
                audience_id = %ticket.audience_id,
                token = ticket.token.0,
                "Dispatching audience lookup"
            );
            let graph = self.graph.clone();
            let resolver = self.resolver.clone();
            in_flight.push(tokio::spawn(async move {
                let result = resolver.resolve(&ticket.audience_id).await;
                let outcome = graph.lock().apply_resolution(&ticket, result);
                ResolutionReport { ticket, outcome }
            }));
        }
    }
}
