use async_trait::async_trait;
use std::collections::HashSet;
use tagsync_core::{Checksum, Descriptor, ProjectId};

/// Error from the external resolver. Fetches degrade to an explicit
/// "unavailable" answer instead of propagating this to callers.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ResolveError(Box<dyn std::error::Error + Send + Sync>);

impl ResolveError {
  pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Self(err.into())
  }
}

/// The semantic resolver that actually computes descriptors from a
/// compilation. Expensive; invoked only on store miss.
#[async_trait]
pub trait DescriptorResolver: Send + Sync + 'static {
  /// Compute the full current checksum set for a project.
  async fn current_checksums(&self, project: &ProjectId) -> Result<HashSet<Checksum>, ResolveError>;

  /// Compute the descriptor for one checksum; `None` when the
  /// checksum no longer corresponds to anything.
  async fn descriptor(&self, checksum: &Checksum) -> Result<Option<Descriptor>, ResolveError>;
}
