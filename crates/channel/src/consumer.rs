//! Consumer side of the sync channel.
//!
//! A dedicated reader loop pulls one frame at a time off the stream
//! and dispatches it to the handler. One garbled read is tolerated
//! (logged, loop continues); a second consecutive one is treated as a
//! corrupted connection and surfaced to the owner. Cancellation and a
//! clean end of stream both terminate silently.

use async_trait::async_trait;
use ipc::{FrameError, ProjectInfoMessage};
use tagsync_core::ProjectId;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Error from a [`ProjectInfoHandler`] callback. Logged per message;
/// never terminates the reader loop.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct HandlerError(Box<dyn std::error::Error + Send + Sync>);

impl HandlerError {
  pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Self(err.into())
  }
}

/// Fatal reader-loop outcome, observable to the owner.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
  #[error("Connection corrupted: {0}")]
  Corrupt(#[source] FrameError),
}

/// Consumer-side dispatch target for project notifications.
#[async_trait]
pub trait ProjectInfoHandler: Send + Sync + 'static {
  /// A project's serialized info was (re)published.
  async fn project_updated(&self, payload: Vec<u8>) -> Result<(), HandlerError>;

  /// A project is gone; drop all state held for it.
  async fn project_removed(&self, project: ProjectId) -> Result<(), HandlerError>;
}

/// Reader loop over an established, ordered byte stream.
pub struct ProjectInfoConsumer<R, H> {
  reader: R,
  handler: H,
  cancel: CancellationToken,
}

impl<R, H> ProjectInfoConsumer<R, H>
where
  R: AsyncRead + Unpin + Send + Sync + 'static,
  H: ProjectInfoHandler,
{
  pub fn new(reader: R, handler: H, cancel: CancellationToken) -> Self {
    Self {
      reader,
      handler,
      cancel,
    }
  }

  /// Spawn the reader loop; the handle resolves with the loop's fatal
  /// outcome (or `Ok` on cancellation / clean close).
  pub fn spawn(self) -> JoinHandle<Result<(), ChannelError>> {
    tokio::spawn(self.run())
  }

  /// Run the reader loop until the stream closes, cancellation is
  /// requested, or the connection proves corrupt.
  pub async fn run(mut self) -> Result<(), ChannelError> {
    let mut consecutive_failures = 0u32;

    loop {
      tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
              debug!("consumer loop cancelled");
              return Ok(());
          }

          result = ipc::read_message(&mut self.reader) => match result {
              Ok(Some(message)) => {
                  consecutive_failures = 0;
                  self.dispatch(message).await;
              }
              Ok(None) => {
                  debug!("stream closed, consumer loop ending");
                  return Ok(());
              }
              Err(e) => {
                  consecutive_failures += 1;
                  if consecutive_failures >= 2 {
                      error!(error = %e, "second consecutive bad frame, treating connection as corrupt");
                      return Err(ChannelError::Corrupt(e));
                  }
                  warn!(error = %e, "bad frame, tolerating once");
              }
          }
      }
    }
  }

  async fn dispatch(&self, message: ProjectInfoMessage) {
    let tag = message.tag();
    let result = match message {
      ProjectInfoMessage::Update { payload } => self.handler.project_updated(payload).await,
      ProjectInfoMessage::Remove { project } => {
        debug!(project = %project, "project removed");
        self.handler.project_removed(project).await
      }
    };
    if let Err(e) = result {
      warn!(tag, error = %e, "handler failed for message");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ipc::{TAG_REMOVE, TAG_UPDATE};
  use std::sync::{Arc, Mutex};
  use tokio::io::AsyncWriteExt;

  #[derive(Default)]
  struct Recorded {
    updates: Vec<Vec<u8>>,
    removals: Vec<ProjectId>,
  }

  #[derive(Clone, Default)]
  struct Recorder {
    seen: Arc<Mutex<Recorded>>,
    fail_updates: bool,
  }

  #[async_trait]
  impl ProjectInfoHandler for Recorder {
    async fn project_updated(&self, payload: Vec<u8>) -> Result<(), HandlerError> {
      self.seen.lock().unwrap().updates.push(payload);
      if self.fail_updates {
        return Err(HandlerError::new("handler rejected update"));
      }
      Ok(())
    }

    async fn project_removed(&self, project: ProjectId) -> Result<(), HandlerError> {
      self.seen.lock().unwrap().removals.push(project);
      Ok(())
    }
  }

  fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![tag];
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
  }

  #[tokio::test]
  async fn dispatches_updates_and_removals_until_eof() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let recorder = Recorder::default();
    let consumer = ProjectInfoConsumer::new(rx, recorder.clone(), CancellationToken::new());

    tx.write_all(&frame(TAG_UPDATE, b"info-a")).await.unwrap();
    tx.write_all(&frame(TAG_REMOVE, b"proj-b")).await.unwrap();
    drop(tx);

    consumer.run().await.unwrap();

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.updates, vec![b"info-a".to_vec()]);
    assert_eq!(seen.removals, vec![ProjectId::from("proj-b")]);
  }

  #[tokio::test]
  async fn one_garbled_frame_is_tolerated() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let recorder = Recorder::default();
    let consumer = ProjectInfoConsumer::new(rx, recorder.clone(), CancellationToken::new());

    // One garbage tag byte; the loop resynchronizes on the next byte
    tx.write_all(&[0x99]).await.unwrap();
    tx.write_all(&frame(TAG_UPDATE, b"recovered")).await.unwrap();
    drop(tx);

    consumer.run().await.unwrap();

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.updates, vec![b"recovered".to_vec()]);
  }

  #[tokio::test]
  async fn two_consecutive_garbled_frames_are_fatal() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let consumer = ProjectInfoConsumer::new(rx, Recorder::default(), CancellationToken::new());

    tx.write_all(&[0x99, 0x98]).await.unwrap();
    drop(tx);

    match consumer.run().await {
      Err(ChannelError::Corrupt(FrameError::UnknownTag(0x98))) => {}
      other => panic!("expected corrupt connection, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn cancellation_ends_loop_cleanly() {
    let (_tx, rx) = tokio::io::duplex(1024);
    let cancel = CancellationToken::new();
    let consumer = ProjectInfoConsumer::new(rx, Recorder::default(), cancel.clone());

    let handle = consumer.spawn();
    cancel.cancel();

    assert!(handle.await.unwrap().is_ok());
  }

  #[tokio::test]
  async fn handler_error_does_not_end_loop() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let recorder = Recorder {
      fail_updates: true,
      ..Recorder::default()
    };
    let consumer = ProjectInfoConsumer::new(rx, recorder.clone(), CancellationToken::new());

    tx.write_all(&frame(TAG_UPDATE, b"first")).await.unwrap();
    tx.write_all(&frame(TAG_UPDATE, b"second")).await.unwrap();
    drop(tx);

    consumer.run().await.unwrap();

    assert_eq!(recorder.seen.lock().unwrap().updates.len(), 2);
  }
}
