//! Journey flow builder: the editable graph of audience and exit steps,
//! their branches and message bindings, and the asynchronous audience
//! refresh protocol that keeps per-step metadata current.

pub mod draft;
pub mod graph;
pub mod node;
pub mod refresh;
pub mod state_machine;
pub mod templates;
pub mod triggers;
pub mod types;
pub mod validation;

pub use draft::{DraftMessage, DraftNode, DraftTrigger, FlowDraft};
pub use graph::{GraphSettings, JourneyGraph};
pub use node::{FreshnessToken, Node, ResolutionOutcome, ResolutionTicket};
pub use refresh::{RefreshCoordinator, ResolutionReport, SharedGraph};
pub use state_machine::ResolutionStateMachine;
pub use triggers::TriggerRegistry;
pub use types::{Message, MessageView, NodeFlags, NodeView, ResolvedAudience, Trigger, TriggerView};
pub use validation::ValidationReport;
