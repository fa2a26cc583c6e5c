use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campaign_core::config::ResolverConfig;
use campaign_core::{AudienceId, AudienceMetadata, ResolveError};
use tracing::warn;

/// Resolves an audience id to its descriptive metadata.
///
/// Calls are idempotent reads; callers may issue several for the same id and
/// drop the ones they no longer care about.
#[async_trait]
pub trait AudienceResolver: Send + Sync {
    async fn resolve(&self, audience_id: &AudienceId) -> Result<AudienceMetadata, ResolveError>;
}

#[async_trait]
impl<R: AudienceResolver + ?Sized> AudienceResolver for Arc<R> {
    async fn resolve(&self, audience_id: &AudienceId) -> Result<AudienceMetadata, ResolveError> {
        (**self).resolve(audience_id).await
    }
}

/// Bounds every lookup of the inner resolver. An elapsed lookup is reported
/// as a transient failure.
pub struct TimeoutResolver<R> {
    inner: R,
    timeout: Duration,
}

impl<R: AudienceResolver> TimeoutResolver<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn from_config(inner: R, config: &ResolverConfig) -> Self {
        Self::new(inner, Duration::from_millis(config.timeout_ms))
    }
}

#[async_trait]
impl<R: AudienceResolver> AudienceResolver for TimeoutResolver<R> {
    async fn resolve(&self, audience_id: &AudienceId) -> Result<AudienceMetadata, ResolveError> {
        match tokio::time::timeout(self.timeout, self.inner.resolve(audience_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(audience_id = %audience_id, timeout_ms = self.timeout.as_millis() as u64, "Audience lookup timed out");
                Err(ResolveError::Transient(format!(
                    "lookup of {} timed out after {}ms",
                    audience_id,
                    self.timeout.as_millis()
                )))
            }
        }
    }
}
