//! Audience resolution: looks up segment metadata for journey audience
//! steps. Pure data-fetch adapters; membership evaluation lives elsewhere.

pub mod directory;
pub mod resolver;

pub use directory::{Segment, SegmentDirectory};
pub use resolver::{AudienceResolver, TimeoutResolver};
