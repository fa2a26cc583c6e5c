pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::AppConfig;
pub use error::{CatalogError, FlowError, FlowResult, ResolveError};
pub use types::{AudienceId, AudienceMetadata, Channel, NodeId, StepKind, TemplateId, TriggerId};
