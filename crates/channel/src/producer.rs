//! Producer side of the sync channel.
//!
//! Change notifications are debounced and deduplicated per project by
//! a [`BatchQueue`]; each flush turns the surviving work items into
//! frames on the stream. Removals ride the same queue as a
//! distinguishable work kind so coalescing can never drop one, and a
//! removal takes precedence over an update for the same project within
//! one flush: the project is being torn down, and a late update would
//! resurrect stale state on the consumer.

use async_trait::async_trait;
use batch::{BatchError, BatchProcessor, BatchQueue, QueueClosed};
use ipc::ProjectInfoMessage;
use std::collections::HashSet;
use std::time::Duration;
use tagsync_core::ProjectId;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Error from a [`ProjectInfoSource`] lookup.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct SourceError(Box<dyn std::error::Error + Send + Sync>);

impl SourceError {
  pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Self(err.into())
  }
}

/// Computes and serializes current project info on demand.
///
/// This is the expensive host-side discovery step the channel exists
/// to amortize; it runs once per project per flush, after debouncing.
/// `None` means the project is unknown to the host and the update is
/// skipped.
#[async_trait]
pub trait ProjectInfoSource: Send + Sync + 'static {
  async fn project_info(&self, project: &ProjectId) -> Result<Option<Vec<u8>>, SourceError>;
}

/// Work kinds coalesced by the producer. Equality (and therefore
/// deduplication) covers both the kind and the project id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProducerWork {
  Changed(ProjectId),
  Removed(ProjectId),
}

/// Writes project-info frames for every settled batch of changes.
pub struct ProjectInfoProducer {
  queue: BatchQueue<ProducerWork>,
}

impl ProjectInfoProducer {
  /// Spawn the producer over an established, ordered byte stream.
  pub fn spawn<W, S>(writer: W, source: S, debounce: Duration) -> Self
  where
    W: AsyncWrite + Unpin + Send + 'static,
    S: ProjectInfoSource,
  {
    let processor = FlushProcessor {
      writer: Mutex::new(writer),
      source,
    };
    Self {
      queue: BatchQueue::spawn(debounce, processor),
    }
  }

  /// Note that a project changed; coalesced into the current window.
  pub fn notify_changed(&self, project: ProjectId) -> Result<(), QueueClosed> {
    self.queue.add_work(ProducerWork::Changed(project))
  }

  /// Note that a project was removed. Never dropped by coalescing, and
  /// wins over a pending update for the same project.
  pub fn notify_removed(&self, project: ProjectId) -> Result<(), QueueClosed> {
    self.queue.add_work(ProducerWork::Removed(project))
  }

  /// Test affordance: resolve once the batch pending or in flight at
  /// the moment of the call has been written out.
  pub async fn wait_until_flushed(&self) {
    self.queue.wait_until_current_batch_completes().await;
  }

  /// Stop accepting work without waiting for the worker. Idempotent.
  pub fn close(&self) {
    self.queue.close();
  }

  /// Stop the producer and wait for its worker to exit.
  pub async fn shutdown(self) {
    self.queue.shutdown().await;
  }
}

struct FlushProcessor<W, S> {
  // The queue never overlaps flushes, so this mutex is uncontended; it
  // only makes the writer shareable from the batch task.
  writer: Mutex<W>,
  source: S,
}

#[async_trait]
impl<W, S> BatchProcessor<ProducerWork> for FlushProcessor<W, S>
where
  W: AsyncWrite + Unpin + Send + 'static,
  S: ProjectInfoSource,
{
  async fn process(&self, items: Vec<ProducerWork>, cancel: &CancellationToken) -> Result<(), BatchError> {
    let mut removed = HashSet::new();
    let mut changed = Vec::new();
    for item in items {
      match item {
        ProducerWork::Removed(project) => {
          removed.insert(project);
        }
        ProducerWork::Changed(project) => changed.push(project),
      }
    }

    let mut writer = self.writer.lock().await;

    for project in &removed {
      trace!(project = %project, "writing remove frame");
      ipc::write_message(&mut *writer, &ProjectInfoMessage::Remove {
        project: project.clone(),
      })
      .await
      .map_err(BatchError::new)?;
    }

    for project in changed {
      if cancel.is_cancelled() {
        debug!("flush cancelled, abandoning remaining updates");
        break;
      }
      if removed.contains(&project) {
        // Remove wins within this flush
        continue;
      }

      // A failed lookup skips this project's frame; a write failure is
      // a connection problem and fails the whole batch
      let payload = match self.source.project_info(&project).await {
        Ok(Some(payload)) => payload,
        Ok(None) => {
          debug!(project = %project, "project unknown to host, skipping update");
          continue;
        }
        Err(e) => {
          warn!(project = %project, error = %e, "failed to compute project info");
          continue;
        }
      };

      trace!(project = %project, bytes = payload.len(), "writing update frame");
      ipc::write_message(&mut *writer, &ProjectInfoMessage::Update { payload })
        .await
        .map_err(BatchError::new)?;
    }

    writer.flush().await.map_err(BatchError::new)?;
    Ok(())
  }
}
