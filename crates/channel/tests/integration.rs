//! End-to-end tests for the sync channel: producer batching through to
//! consumer dispatch, over an in-process duplex stream and over a real
//! Unix socket.

use async_trait::async_trait;
use channel::{
  HandlerError, ProjectInfoConsumer, ProjectInfoHandler, ProjectInfoProducer, ProjectInfoSource, SourceError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagsync_core::ProjectId;
use tokio_util::sync::CancellationToken;

const DEBOUNCE: Duration = Duration::from_millis(50);

/// Serves canned project info from a map.
struct MapSource {
  info: Mutex<HashMap<ProjectId, Vec<u8>>>,
  failing: Option<ProjectId>,
}

impl MapSource {
  fn new(entries: &[(&str, &[u8])]) -> Self {
    Self {
      info: Mutex::new(
        entries
          .iter()
          .map(|(id, payload)| (ProjectId::from(*id), payload.to_vec()))
          .collect(),
      ),
      failing: None,
    }
  }
}

#[async_trait]
impl ProjectInfoSource for MapSource {
  async fn project_info(&self, project: &ProjectId) -> Result<Option<Vec<u8>>, SourceError> {
    if self.failing.as_ref() == Some(project) {
      return Err(SourceError::new("discovery failed"));
    }
    Ok(self.info.lock().unwrap().get(project).cloned())
  }
}

#[derive(Default)]
struct Seen {
  updates: Vec<Vec<u8>>,
  removals: Vec<ProjectId>,
}

#[derive(Clone, Default)]
struct Recorder {
  seen: Arc<Mutex<Seen>>,
}

#[async_trait]
impl ProjectInfoHandler for Recorder {
  async fn project_updated(&self, payload: Vec<u8>) -> Result<(), HandlerError> {
    self.seen.lock().unwrap().updates.push(payload);
    Ok(())
  }

  async fn project_removed(&self, project: ProjectId) -> Result<(), HandlerError> {
    self.seen.lock().unwrap().removals.push(project);
    Ok(())
  }
}

/// Poll until the recorder has seen the expected totals (the consumer
/// runs as a free task, so arrival is asynchronous).
async fn wait_for(recorder: &Recorder, updates: usize, removals: usize) {
  for _ in 0..200 {
    {
      let seen = recorder.seen.lock().unwrap();
      if seen.updates.len() >= updates && seen.removals.len() >= removals {
        return;
      }
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  panic!("consumer never saw {updates} updates / {removals} removals");
}

#[tokio::test(start_paused = true)]
async fn burst_of_changes_flows_as_one_flush() {
  let (producer_io, consumer_io) = tokio::io::duplex(4096);
  let source = MapSource::new(&[("proj-a", b"info-a"), ("proj-b", b"info-b")]);
  let producer = ProjectInfoProducer::spawn(producer_io, source, DEBOUNCE);

  let recorder = Recorder::default();
  let cancel = CancellationToken::new();
  let consumer = ProjectInfoConsumer::new(consumer_io, recorder.clone(), cancel.clone()).spawn();

  // Many notifications for two projects inside one window
  for _ in 0..10 {
    producer.notify_changed(ProjectId::from("proj-a")).unwrap();
    producer.notify_changed(ProjectId::from("proj-b")).unwrap();
  }
  producer.wait_until_flushed().await;

  wait_for(&recorder, 2, 0).await;
  {
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.updates.len(), 2, "one update frame per distinct project");
    assert!(seen.updates.contains(&b"info-a".to_vec()));
    assert!(seen.updates.contains(&b"info-b".to_vec()));
  }

  producer.shutdown().await;
  cancel.cancel();
  consumer.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn remove_wins_over_update_in_same_flush() {
  let (producer_io, consumer_io) = tokio::io::duplex(4096);
  let source = MapSource::new(&[("doomed", b"stale"), ("alive", b"fresh")]);
  let producer = ProjectInfoProducer::spawn(producer_io, source, DEBOUNCE);

  let recorder = Recorder::default();
  let cancel = CancellationToken::new();
  let consumer = ProjectInfoConsumer::new(consumer_io, recorder.clone(), cancel.clone()).spawn();

  producer.notify_changed(ProjectId::from("doomed")).unwrap();
  producer.notify_changed(ProjectId::from("alive")).unwrap();
  producer.notify_removed(ProjectId::from("doomed")).unwrap();
  producer.wait_until_flushed().await;

  wait_for(&recorder, 1, 1).await;
  {
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.removals, vec![ProjectId::from("doomed")]);
    // The doomed project's update was dropped, not written after the
    // remove
    assert_eq!(seen.updates, vec![b"fresh".to_vec()]);
  }

  producer.shutdown().await;
  cancel.cancel();
  consumer.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_lookup_skips_frame_but_batch_survives() {
  let (producer_io, consumer_io) = tokio::io::duplex(4096);
  let mut source = MapSource::new(&[("good", b"payload"), ("bad", b"never-sent")]);
  source.failing = Some(ProjectId::from("bad"));
  let producer = ProjectInfoProducer::spawn(producer_io, source, DEBOUNCE);

  let recorder = Recorder::default();
  let cancel = CancellationToken::new();
  let consumer = ProjectInfoConsumer::new(consumer_io, recorder.clone(), cancel.clone()).spawn();

  producer.notify_changed(ProjectId::from("bad")).unwrap();
  producer.notify_changed(ProjectId::from("good")).unwrap();
  producer.wait_until_flushed().await;

  wait_for(&recorder, 1, 0).await;
  assert_eq!(recorder.seen.lock().unwrap().updates, vec![b"payload".to_vec()]);

  // A later flush still works
  producer.notify_changed(ProjectId::from("good")).unwrap();
  producer.wait_until_flushed().await;
  wait_for(&recorder, 2, 0).await;

  producer.shutdown().await;
  cancel.cancel();
  consumer.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_project_produces_no_frame() {
  let (producer_io, consumer_io) = tokio::io::duplex(4096);
  let source = MapSource::new(&[("known", b"payload")]);
  let producer = ProjectInfoProducer::spawn(producer_io, source, DEBOUNCE);

  let recorder = Recorder::default();
  let cancel = CancellationToken::new();
  let consumer = ProjectInfoConsumer::new(consumer_io, recorder.clone(), cancel.clone()).spawn();

  producer.notify_changed(ProjectId::from("ghost")).unwrap();
  producer.notify_changed(ProjectId::from("known")).unwrap();
  producer.wait_until_flushed().await;

  wait_for(&recorder, 1, 0).await;
  assert_eq!(recorder.seen.lock().unwrap().updates, vec![b"payload".to_vec()]);

  producer.shutdown().await;
  cancel.cancel();
  consumer.await.unwrap().unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn full_round_trip_over_unix_socket() {
  let dir = tempfile::TempDir::new().unwrap();
  let socket_path = dir.path().join("tagsync.sock");
  let cancel = CancellationToken::new();

  let listener = channel::bind_listener(&socket_path).unwrap();

  // Consumer connects while the producer side accepts
  let connect_path = socket_path.clone();
  let connect_cancel = cancel.clone();
  let connecting = tokio::spawn(async move {
    channel::connect_with_retry(&connect_path, Duration::from_secs(5), &connect_cancel).await
  });

  let accepted = channel::accept_one(&listener, &cancel).await.unwrap().unwrap();
  let consumer_stream = connecting.await.unwrap().unwrap();

  let source = MapSource::new(&[("proj", b"over-the-socket")]);
  let producer = ProjectInfoProducer::spawn(accepted, source, Duration::from_millis(10));

  let recorder = Recorder::default();
  let consumer = ProjectInfoConsumer::new(consumer_stream, recorder.clone(), cancel.clone()).spawn();

  producer.notify_changed(ProjectId::from("proj")).unwrap();
  producer.wait_until_flushed().await;
  producer.notify_removed(ProjectId::from("proj")).unwrap();
  producer.wait_until_flushed().await;

  wait_for(&recorder, 1, 1).await;
  {
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.updates, vec![b"over-the-socket".to_vec()]);
    assert_eq!(seen.removals, vec![ProjectId::from("proj")]);
  }

  // Teardown: producer first, then the consumer sees a clean close
  producer.shutdown().await;
  let outcome = consumer.await.unwrap();
  assert!(outcome.is_ok());
}
