//! Consumer-local project table and the channel → session bridge.

use crate::session::SyncSession;
use async_trait::async_trait;
use channel::{HandlerError, ProjectInfoHandler};
use dashmap::DashMap;
use std::sync::Arc;
use tagsync_core::ProjectId;

/// Error from a payload decoder.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct DecodeError(Box<dyn std::error::Error + Send + Sync>);

impl DecodeError {
  pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Self(err.into())
  }
}

/// Extracts the project identity from an opaque update payload.
///
/// The payload codec belongs to the producing host; the session only
/// needs the id to key its table.
pub trait ProjectInfoDecoder: Send + Sync + 'static {
  fn project_id(&self, payload: &[u8]) -> Result<ProjectId, DecodeError>;
}

/// Latest serialized project info per project, as received over the
/// channel.
pub(crate) struct ProjectTable {
  entries: DashMap<ProjectId, Vec<u8>>,
}

impl ProjectTable {
  pub(crate) fn new() -> Self {
    Self {
      entries: DashMap::new(),
    }
  }

  pub(crate) fn upsert(&self, project: ProjectId, payload: Vec<u8>) {
    self.entries.insert(project, payload);
  }

  pub(crate) fn remove(&self, project: &ProjectId) {
    self.entries.remove(project);
  }

  pub(crate) fn get(&self, project: &ProjectId) -> Option<Vec<u8>> {
    self.entries.get(project).map(|entry| entry.value().clone())
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }
}

/// Bridges channel notifications into a session: updates land in the
/// project table, removals also retire the project's delta snapshot.
pub struct SessionHandler<D> {
  session: Arc<SyncSession>,
  decoder: D,
}

impl<D: ProjectInfoDecoder> SessionHandler<D> {
  pub fn new(session: Arc<SyncSession>, decoder: D) -> Self {
    Self { session, decoder }
  }
}

#[async_trait]
impl<D: ProjectInfoDecoder> ProjectInfoHandler for SessionHandler<D> {
  async fn project_updated(&self, payload: Vec<u8>) -> Result<(), HandlerError> {
    let project = self.decoder.project_id(&payload).map_err(HandlerError::new)?;
    self.session.apply_update(project, payload);
    Ok(())
  }

  async fn project_removed(&self, project: ProjectId) -> Result<(), HandlerError> {
    self.session.apply_removal(&project);
    Ok(())
  }
}
