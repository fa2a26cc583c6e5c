use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use campaign_core::types::ResolutionStatus;
use campaign_core::FlowResult;

/// Describes a single valid transition of a step's audience resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolutionTransition {
    pub from: ResolutionStatus,
    pub to: ResolutionStatus,
    pub trigger: &'static str,
}

const TRANSITIONS: &[ResolutionTransition] = &[
    // Unresolved ->
    ResolutionTransition {
        from: ResolutionStatus::Unresolved,
        to: ResolutionStatus::Resolving,
        trigger: "audience_assigned",
    },
    // Resolving ->
    ResolutionTransition {
        from: ResolutionStatus::Resolving,
        to: ResolutionStatus::Resolved,
        trigger: "resolution_applied",
    },
    ResolutionTransition {
        from: ResolutionStatus::Resolving,
        to: ResolutionStatus::Stale,
        trigger: "audience_changed",
    },
    ResolutionTransition {
        from: ResolutionStatus::Resolving,
        to: ResolutionStatus::Unresolved,
        trigger: "resolution_failed",
    },
    // Resolved ->
    ResolutionTransition {
        from: ResolutionStatus::Resolved,
        to: ResolutionStatus::Stale,
        trigger: "audience_changed",
    },
    ResolutionTransition {
        from: ResolutionStatus::Resolved,
        to: ResolutionStatus::Unresolved,
        trigger: "audience_cleared",
    },
    // Stale ->
    ResolutionTransition {
        from: ResolutionStatus::Stale,
        to: ResolutionStatus::Resolving,
        trigger: "re_resolve",
    },
];

/// Guards a step's resolution status by enforcing the finite set of valid
/// transitions. Exit steps never own one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionStateMachine {
    state: ResolutionStatus,
}

impl ResolutionStateMachine {
    pub fn new() -> Self {
        Self {
            state: ResolutionStatus::Unresolved,
        }
    }

    pub fn state(&self) -> ResolutionStatus {
        self.state
    }

    pub fn transitions() -> &'static [ResolutionTransition] {
        TRANSITIONS
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(from: ResolutionStatus, to: ResolutionStatus) -> bool {
        TRANSITIONS.iter().any(|t| t.from == from && t.to == to)
    }

    /// Attempts to move to `to`. Returns an error if the transition is not
    /// permitted; the state is unchanged in that case.
    pub fn transition(&mut self, to: ResolutionStatus) -> FlowResult<()> {
        if Self::can_transition(self.state, to) {
            self.state = to;
            Ok(())
        } else {
            Err(anyhow!(
                "Invalid resolution transition from {:?} to {:?}",
                self.state,
                to
            )
            .into())
        }
    }

    /// Starts a new lookup from whatever state the step is in. An in-flight
    /// or completed resolution is marked stale first.
    pub fn restart(&mut self) -> FlowResult<()> {
        match self.state {
            ResolutionStatus::Unresolved | ResolutionStatus::Stale => {
                self.transition(ResolutionStatus::Resolving)
            }
            ResolutionStatus::Resolving | ResolutionStatus::Resolved => {
                self.transition(ResolutionStatus::Stale)?;
                self.transition(ResolutionStatus::Resolving)
            }
        }
    }

    /// Drops back to `Unresolved`. Resolving steps go through the stale state
    /// so the abandoned request is accounted for.
    pub fn reset(&mut self) -> FlowResult<()> {
        match self.state {
            ResolutionStatus::Unresolved => Ok(()),
            ResolutionStatus::Resolving => self.transition(ResolutionStatus::Unresolved),
            ResolutionStatus::Resolved => self.transition(ResolutionStatus::Unresolved),
            ResolutionStatus::Stale => {
                self.transition(ResolutionStatus::Resolving)?;
                self.transition(ResolutionStatus::Unresolved)
            }
        }
    }
}

impl Default for ResolutionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut sm = ResolutionStateMachine::new();
        assert_eq!(sm.state(), ResolutionStatus::Unresolved);
        sm.transition(ResolutionStatus::Resolving).unwrap();
        sm.transition(ResolutionStatus::Resolved).unwrap();
        assert_eq!(sm.state(), ResolutionStatus::Resolved);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut sm = ResolutionStateMachine::new();
        assert!(sm.transition(ResolutionStatus::Resolved).is_err());
        assert_eq!(sm.state(), ResolutionStatus::Unresolved);
        assert!(!ResolutionStateMachine::can_transition(
            ResolutionStatus::Stale,
            ResolutionStatus::Resolved
        ));
    }

    #[test]
    fn test_restart_goes_through_stale() {
        let mut sm = ResolutionStateMachine::new();
        sm.restart().unwrap();
        assert_eq!(sm.state(), ResolutionStatus::Resolving);
        sm.restart().unwrap();
        assert_eq!(sm.state(), ResolutionStatus::Resolving);
        sm.transition(ResolutionStatus::Resolved).unwrap();
        sm.restart().unwrap();
        assert_eq!(sm.state(), ResolutionStatus::Resolving);
    }

    #[test]
    fn test_reset_from_every_state() {
        for start in [
            ResolutionStatus::Unresolved,
            ResolutionStatus::Resolving,
            ResolutionStatus::Resolved,
        ] {
            let mut sm = ResolutionStateMachine::new();
            if start != ResolutionStatus::Unresolved {
                sm.transition(ResolutionStatus::Resolving).unwrap();
            }
            if start == ResolutionStatus::Resolved {
                sm.transition(ResolutionStatus::Resolved).unwrap();
            }
            sm.reset().unwrap();
            assert_eq!(sm.state(), ResolutionStatus::Unresolved);
        }
    }
}
