//! Unix-socket transport helpers.
//!
//! Endpoint naming and reconnection policy belong to the owning
//! process; these helpers cover the mechanical parts: binding with
//! stale-socket cleanup, accepting with cancellation, and polling a
//! socket path until the producer side is up.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval between connection attempts while waiting for the
/// producer's socket to come up.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ConnectError {
  #[error("No connectable socket within {0:?}")]
  Timeout(Duration),
  #[error("Connection attempt cancelled")]
  Cancelled,
}

/// Default socket path for the current user.
pub fn default_socket_path() -> PathBuf {
  if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
    PathBuf::from(runtime_dir).join("tagsync.sock")
  } else {
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/tagsync-{uid}.sock"))
  }
}

/// Bind the producer-side listener, removing a stale socket file and
/// creating the parent directory if needed.
pub fn bind_listener(path: &Path) -> std::io::Result<UnixListener> {
  if path.exists() {
    std::fs::remove_file(path)?;
  }
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  UnixListener::bind(path)
}

/// Accept one connection, or `None` when cancelled first.
pub async fn accept_one(listener: &UnixListener, cancel: &CancellationToken) -> std::io::Result<Option<UnixStream>> {
  tokio::select! {
      biased;
      _ = cancel.cancelled() => Ok(None),
      result = listener.accept() => result.map(|(stream, _)| Some(stream)),
  }
}

/// Poll the socket path until it accepts a connection.
///
/// This is the consumer-side "wait for the transport to report
/// connected" step: the socket may not exist yet, or may exist while
/// the producer is still binding.
pub async fn connect_with_retry(
  path: &Path,
  timeout: Duration,
  cancel: &CancellationToken,
) -> Result<UnixStream, ConnectError> {
  let deadline = tokio::time::Instant::now() + timeout;

  loop {
    if path.exists() {
      match UnixStream::connect(path).await {
        Ok(stream) => return Ok(stream),
        Err(e) => {
          debug!(path = %path.display(), error = %e, "socket exists but connection failed, retrying");
        }
      }
    }

    if tokio::time::Instant::now() >= deadline {
      return Err(ConnectError::Timeout(timeout));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
        _ = tokio::time::sleep(CONNECT_POLL_INTERVAL) => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn bind_replaces_stale_socket() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("tagsync.sock");

    let first = bind_listener(&path).unwrap();
    drop(first);
    // The stale socket file is still on disk; rebinding must succeed
    assert!(path.exists());
    bind_listener(&path).unwrap();
  }

  #[tokio::test]
  async fn connect_times_out_when_nothing_listens() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("absent.sock");

    let result = connect_with_retry(&path, Duration::from_millis(250), &CancellationToken::new()).await;
    assert!(matches!(result, Err(ConnectError::Timeout(_))));
  }

  #[tokio::test]
  async fn connect_observes_cancellation() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("absent.sock");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = connect_with_retry(&path, Duration::from_secs(5), &cancel).await;
    assert!(matches!(result, Err(ConnectError::Cancelled)));
  }

  #[tokio::test]
  async fn connect_succeeds_once_listener_appears() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("late.sock");
    let cancel = CancellationToken::new();

    let connect_path = path.clone();
    let connector = tokio::spawn(async move {
      connect_with_retry(&connect_path, Duration::from_secs(5), &CancellationToken::new()).await
    });

    // Bind after the consumer has already started polling
    tokio::time::sleep(Duration::from_millis(150)).await;
    let listener = bind_listener(&path).unwrap();

    let stream = connector.await.unwrap().unwrap();
    let accepted = accept_one(&listener, &cancel).await.unwrap();
    assert!(accepted.is_some());
    drop(stream);
  }
}
