//! Structural validation: reachability from the entry step and dangling
//! branches. Computed on demand; nothing here is cached between edits.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::info;

use campaign_core::{FlowError, FlowResult, NodeId, StepKind, TriggerId};

use crate::graph::JourneyGraph;

/// Result of [`JourneyGraph::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub entry: Option<NodeId>,
    /// Steps not reachable from the entry, sorted.
    pub unreachable: Vec<NodeId>,
    /// Branches without a target, sorted.
    pub dangling: Vec<TriggerId>,
    /// Audience steps with no audience picked yet. Advisory only; does not
    /// block activation.
    pub unassigned_audience: Vec<NodeId>,
}

impl ValidationReport {
    /// A graph may go live iff every step is reachable and no branch dangles.
    pub fn is_activatable(&self) -> bool {
        self.unreachable.is_empty() && self.dangling.is_empty()
    }
}

impl JourneyGraph {
    /// Breadth-first reachability from the entry over connected branches.
    /// `retarget` evaluates the graph as if one branch pointed elsewhere.
    pub(crate) fn reachable_with(
        &self,
        retarget: Option<(TriggerId, Option<NodeId>)>,
    ) -> HashSet<NodeId> {
        let mut visited = HashSet::with_capacity(self.nodes.len());
        let Some(entry) = self.entry else {
            return visited;
        };

        let mut frontier = VecDeque::new();
        visited.insert(entry);
        frontier.push_back(entry);

        while let Some(current) = frontier.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for trigger_id in node.triggers() {
                let target = match retarget {
                    Some((overridden, target)) if overridden == *trigger_id => target,
                    _ => self.triggers.get(*trigger_id).and_then(|t| t.target_node_id),
                };
                if let Some(target) = target {
                    if visited.insert(target) {
                        frontier.push_back(target);
                    }
                }
            }
        }
        visited
    }

    /// Reports unreachable steps and dangling branches. Runs in
    /// O(steps + branches).
    pub fn validate(&self) -> ValidationReport {
        let reachable = self.reachable_with(None);

        let mut unreachable: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect();
        unreachable.sort();

        let mut unassigned_audience: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.kind() == StepKind::Audience && n.audience_id().is_none())
            .map(|n| n.id())
            .collect();
        unassigned_audience.sort();

        ValidationReport {
            entry: self.entry,
            unreachable,
            dangling: self.triggers.dangling(),
            unassigned_audience,
        }
    }

    /// Gate for going live: the validation report, or why the graph cannot
    /// be activated.
    pub fn ensure_activatable(&self) -> FlowResult<ValidationReport> {
        if self.is_empty() {
            return Err(FlowError::EmptyGraph);
        }
        let report = self.validate();
        if !report.is_activatable() {
            info!(
                unreachable = report.unreachable.len(),
                dangling = report.dangling.len(),
                "Journey blocked from activation"
            );
            return Err(FlowError::NotActivatable {
                unreachable: report.unreachable,
                dangling: report.dangling,
            });
        }
        Ok(report)
    }
}
