//! In-memory segment directory, the audience lookup used by the CLI and by
//! tests in place of the backend segment service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use campaign_core::{AudienceId, AudienceMetadata, ResolveError};

use crate::resolver::AudienceResolver;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: AudienceId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_dynamic: bool,
    #[serde(default)]
    pub icon_ref: Option<String>,
    #[serde(default)]
    pub display_width: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(id: impl Into<AudienceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            is_dynamic: false,
            icon_ref: None,
            display_width: None,
            tags: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.is_dynamic = true;
        self
    }

    pub fn metadata(&self) -> AudienceMetadata {
        AudienceMetadata {
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            is_dynamic: self.is_dynamic,
            icon_ref: self.icon_ref.clone(),
            display_width: self.display_width.clone(),
        }
    }
}

pub struct SegmentDirectory {
    segments: DashMap<AudienceId, Segment>,
}

impl SegmentDirectory {
    pub fn new() -> Self {
        Self {
            segments: DashMap::new(),
        }
    }

    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        let directory = Self::new();
        for segment in segments {
            directory.register_segment(segment);
        }
        directory
    }

    pub fn register_segment(&self, segment: Segment) {
        self.segments.insert(segment.id.clone(), segment);
    }

    pub fn remove_segment(&self, id: &AudienceId) -> Option<Segment> {
        self.segments.remove(id).map(|(_, s)| s)
    }

    pub fn get_segment(&self, id: &AudienceId) -> Option<Segment> {
        self.segments.get(id).map(|s| s.clone())
    }

    pub fn list_segments(&self) -> Vec<Segment> {
        self.segments.iter().map(|s| s.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Default for SegmentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudienceResolver for SegmentDirectory {
    async fn resolve(&self, audience_id: &AudienceId) -> Result<AudienceMetadata, ResolveError> {
        match self.segments.get(audience_id) {
            Some(segment) => Ok(segment.metadata()),
            None => {
                debug!(audience_id = %audience_id, "Segment not in directory");
                Err(ResolveError::NotFound(audience_id.clone()))
            }
        }
    }
}
