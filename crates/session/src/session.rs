use crate::resolver::{DescriptorResolver, ResolveError};
use crate::table::ProjectTable;
use cache::DescriptorStore;
use delta::DeltaEngine;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tagsync_core::{Checksum, DeltaResult, Descriptor, ProjectId, ResultId, SyncConfig};
use tracing::{debug, warn};

/// Result of a descriptor fetch.
///
/// `Unavailable` is an answer, not a failure: the caller is an
/// interactive tool and must stay responsive even when the resolver
/// cannot produce the descriptors right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  Complete(Vec<Descriptor>),
  Unavailable { missing: Vec<Checksum> },
}

/// One host session's descriptor-synchronization state: the shared
/// store, the per-project delta engine, the resolver seam, and the
/// consumer-local project table.
pub struct SyncSession {
  store: Arc<DescriptorStore>,
  engine: DeltaEngine,
  resolver: Arc<dyn DescriptorResolver>,
  projects: ProjectTable,
}

const FALLBACK_CAPACITY: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

impl SyncSession {
  pub fn new(config: &SyncConfig, resolver: Arc<dyn DescriptorResolver>) -> Self {
    let capacity = NonZeroUsize::new(config.cache.descriptor_capacity).unwrap_or(FALLBACK_CAPACITY);
    Self::with_store(Arc::new(DescriptorStore::new(capacity)), resolver)
  }

  /// Build a session over an existing store (e.g. one shared with
  /// other sessions in the same process).
  pub fn with_store(store: Arc<DescriptorStore>, resolver: Arc<dyn DescriptorResolver>) -> Self {
    Self {
      store,
      engine: DeltaEngine::new(),
      resolver,
      projects: ProjectTable::new(),
    }
  }

  /// The descriptor delta for `project` since the caller's last known
  /// version. This is the cheap polling surface: an unchanged set
  /// answers with the caller's own id and empty deltas.
  pub fn tag_helpers_delta(
    &self,
    project: &ProjectId,
    last: Option<ResultId>,
    current: &HashSet<Checksum>,
  ) -> DeltaResult {
    self.engine.get_delta(project, last, current)
  }

  /// Fetch descriptors by checksum, answering from the store when
  /// possible. On any miss the whole project is recomputed through the
  /// resolver once, the store refilled, and the lookup retried; what
  /// is still missing afterwards comes back as `Unavailable`.
  pub async fn fetch_descriptors(&self, project: &ProjectId, checksums: &[Checksum]) -> FetchOutcome {
    let missing = match self.lookup(checksums) {
      Ok(found) => return FetchOutcome::Complete(found),
      Err(missing) => missing,
    };
    debug!(project = %project, missing = missing.len(), "descriptor miss, recomputing project");

    if let Err(e) = self.refill(project).await {
      warn!(project = %project, error = %e, "resolver recomputation failed");
    }

    match self.lookup(checksums) {
      Ok(found) => FetchOutcome::Complete(found),
      Err(missing) => {
        warn!(project = %project, missing = missing.len(), "descriptors unavailable after refill");
        FetchOutcome::Unavailable { missing }
      }
    }
  }

  /// The store backing this session.
  pub fn descriptor_store(&self) -> &Arc<DescriptorStore> {
    &self.store
  }

  /// Latest serialized info for a project, as received over the
  /// channel.
  pub fn project_info(&self, project: &ProjectId) -> Option<Vec<u8>> {
    self.projects.get(project)
  }

  /// Number of projects currently known to this session.
  pub fn project_count(&self) -> usize {
    self.projects.len()
  }

  pub(crate) fn apply_update(&self, project: ProjectId, payload: Vec<u8>) {
    debug!(project = %project, bytes = payload.len(), "project info updated");
    self.projects.upsert(project, payload);
  }

  pub(crate) fn apply_removal(&self, project: &ProjectId) {
    self.projects.remove(project);
    self.engine.remove_project(project);
  }

  fn lookup(&self, checksums: &[Checksum]) -> Result<Vec<Descriptor>, Vec<Checksum>> {
    let mut found = Vec::with_capacity(checksums.len());
    let mut missing = Vec::new();
    for checksum in checksums {
      match self.store.try_get(checksum) {
        Some(descriptor) => {
          if missing.is_empty() {
            found.push(descriptor);
          }
        }
        None => missing.push(checksum.clone()),
      }
    }
    if missing.is_empty() { Ok(found) } else { Err(missing) }
  }

  async fn refill(&self, project: &ProjectId) -> Result<(), ResolveError> {
    let checksums = self.resolver.current_checksums(project).await?;
    for checksum in checksums {
      if self.store.try_get(&checksum).is_some() {
        continue;
      }
      match self.resolver.descriptor(&checksum).await? {
        Some(descriptor) => {
          if let Err(e) = self.store.try_add(checksum.clone(), descriptor) {
            warn!(checksum = %checksum, error = %e, "failed to store recomputed descriptor");
          }
        }
        None => debug!(checksum = %checksum, "resolver has no descriptor for checksum"),
      }
    }
    Ok(())
  }
}
