//! Work-coalescing queue with a dedicated worker task.
//!
//! # Design
//!
//! Producers push work through a cheap-clone handle over an unbounded
//! channel, so enqueueing never blocks. A single worker task owns all
//! queue state: the deduplicated pending set, the debounce deadline,
//! and the in-flight batch. The debounce window opens when work lands
//! in an empty pending set and is not extended by later arrivals.
//!
//! Batches run as child tasks so the worker keeps accepting work (and
//! cancellation) while one is in flight, but flushes never overlap: an
//! elapsed window with a batch still running is deferred until that
//! batch completes.

use async_trait::async_trait;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Error surfaced by a batch processor. The worker logs it and keeps
/// running; one bad batch never kills the queue.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct BatchError(Box<dyn std::error::Error + Send + Sync>);

impl BatchError {
  pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Self(err.into())
  }
}

/// Error when enqueueing into a queue whose worker has shut down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Batch queue worker has shut down")]
pub struct QueueClosed;

/// Callback invoked with each flushed batch.
///
/// Cancellation is cooperative: `cancel` is set when a caller requests
/// the in-flight batch be abandoned (and on queue shutdown); the
/// processor must observe it itself to stop early.
#[async_trait]
pub trait BatchProcessor<T>: Send + Sync + 'static {
  async fn process(&self, items: Vec<T>, cancel: &CancellationToken) -> Result<(), BatchError>;
}

enum Command<T> {
  Add { item: T, cancel_in_flight: bool },
  Wait { ack: oneshot::Sender<()> },
}

/// Debounced, deduplicating, single-flight, cancelable work coalescer.
///
/// Dropping the queue cancels its worker; [`BatchQueue::shutdown`]
/// additionally waits for the worker to exit.
pub struct BatchQueue<T> {
  tx: mpsc::UnboundedSender<Command<T>>,
  cancel: CancellationToken,
  worker: Option<JoinHandle<()>>,
}

impl<T> BatchQueue<T>
where
  T: Clone + Eq + Hash + Send + 'static,
{
  /// Spawn the worker task for a new queue.
  pub fn spawn<P: BatchProcessor<T>>(debounce: Duration, processor: P) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let worker = Worker {
      rx,
      debounce,
      processor: Arc::new(processor),
      cancel: cancel.clone(),
      pending: HashSet::new(),
      deadline: None,
      inflight: None,
      next_generation: 1,
      waiters: Vec::new(),
    };

    Self {
      tx,
      cancel,
      worker: Some(tokio::spawn(worker.run())),
    }
  }

  /// Enqueue an item into the current debounce window. Never blocks;
  /// duplicates already pending in the same unflushed batch are
  /// dropped.
  pub fn add_work(&self, item: T) -> Result<(), QueueClosed> {
    self
      .tx
      .send(Command::Add {
        item,
        cancel_in_flight: false,
      })
      .map_err(|_| QueueClosed)
  }

  /// Enqueue an item, signal cancellation of the in-flight batch (if
  /// any), and open a fresh debounce window for the new item.
  pub fn add_work_and_cancel_in_flight(&self, item: T) -> Result<(), QueueClosed> {
    self
      .tx
      .send(Command::Add {
        item,
        cancel_in_flight: true,
      })
      .map_err(|_| QueueClosed)
  }

  /// Suspend until the batch pending or in flight at the moment of the
  /// call has been fully processed. Resolves immediately when the
  /// queue is idle, and resolves (rather than hanging) if the queue
  /// shuts down first.
  pub async fn wait_until_current_batch_completes(&self) {
    let (ack, done) = oneshot::channel();
    if self.tx.send(Command::Wait { ack }).is_err() {
      return;
    }
    let _ = done.await;
  }

  /// Cancel the worker without waiting. Idempotent; pending work is
  /// dropped and any waiters are woken.
  pub fn close(&self) {
    self.cancel.cancel();
  }

  /// Cancel the worker and wait for it to exit.
  pub async fn shutdown(mut self) {
    self.cancel.cancel();
    if let Some(worker) = self.worker.take() {
      let _ = worker.await;
    }
  }
}

impl<T> Drop for BatchQueue<T> {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

struct Inflight {
  generation: u64,
  cancel: CancellationToken,
  handle: JoinHandle<Result<(), BatchError>>,
}

struct Worker<T, P> {
  rx: mpsc::UnboundedReceiver<Command<T>>,
  debounce: Duration,
  processor: Arc<P>,
  cancel: CancellationToken,
  pending: HashSet<T>,
  deadline: Option<Instant>,
  inflight: Option<Inflight>,
  next_generation: u64,
  waiters: Vec<(u64, oneshot::Sender<()>)>,
}

enum Event<T> {
  Cancelled,
  Command(Option<Command<T>>),
  FlushDone(Result<Result<(), BatchError>, JoinError>),
  DebounceElapsed,
}

impl<T, P> Worker<T, P>
where
  T: Clone + Eq + Hash + Send + 'static,
  P: BatchProcessor<T>,
{
  async fn run(mut self) {
    loop {
      let event = {
        let Self {
          rx,
          cancel,
          inflight,
          deadline,
          ..
        } = &mut self;

        // Deferred while a batch is in flight; fires immediately after
        // it completes when the window already elapsed
        let flush_deadline = if inflight.is_none() { *deadline } else { None };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Event::Cancelled,

            command = rx.recv() => Event::Command(command),

            result = join_inflight(inflight.as_mut()) => Event::FlushDone(result),

            _ = sleep_until_opt(flush_deadline), if flush_deadline.is_some() => {
                Event::DebounceElapsed
            }
        }
      };

      match event {
        Event::Cancelled => {
          trace!("batch queue worker shutting down (cancelled)");
          break;
        }
        Event::Command(None) => {
          trace!("batch queue worker shutting down (handle dropped)");
          break;
        }
        Event::Command(Some(Command::Add { item, cancel_in_flight })) => {
          self.handle_add(item, cancel_in_flight);
        }
        Event::Command(Some(Command::Wait { ack })) => {
          self.handle_wait(ack);
        }
        Event::FlushDone(result) => {
          if let Some(done) = self.inflight.take() {
            self.finish_flush(done.generation, result);
          }
        }
        Event::DebounceElapsed => {
          self.start_flush();
        }
      }
    }

    // Never strand a waiter on teardown
    for (_, ack) in self.waiters.drain(..) {
      let _ = ack.send(());
    }
  }

  fn handle_add(&mut self, item: T, cancel_in_flight: bool) {
    if cancel_in_flight {
      if let Some(inflight) = &self.inflight {
        debug!(generation = inflight.generation, "cancelling in-flight batch");
        inflight.cancel.cancel();
      }
      self.deadline = Some(Instant::now() + self.debounce);
    } else if self.deadline.is_none() {
      self.deadline = Some(Instant::now() + self.debounce);
    }
    self.pending.insert(item);
  }

  fn handle_wait(&mut self, ack: oneshot::Sender<()>) {
    let target = if !self.pending.is_empty() {
      // The pending set will flush as the next generation
      self.next_generation
    } else if let Some(inflight) = &self.inflight {
      inflight.generation
    } else {
      let _ = ack.send(());
      return;
    };
    self.waiters.push((target, ack));
  }

  fn start_flush(&mut self) {
    self.deadline = None;
    if self.pending.is_empty() {
      return;
    }

    let items: Vec<T> = self.pending.drain().collect();
    let generation = self.next_generation;
    self.next_generation += 1;

    let cancel = self.cancel.child_token();
    let processor = Arc::clone(&self.processor);
    let batch_cancel = cancel.clone();
    let handle = tokio::spawn(async move { processor.process(items, &batch_cancel).await });

    trace!(generation, "flushing batch");
    self.inflight = Some(Inflight {
      generation,
      cancel,
      handle,
    });
  }

  fn finish_flush(&mut self, generation: u64, result: Result<Result<(), BatchError>, JoinError>) {
    match result {
      Ok(Ok(())) => trace!(generation, "batch complete"),
      Ok(Err(e)) => error!(generation, error = %e, "batch processing failed"),
      Err(join) if join.is_panic() => error!(generation, "batch processor panicked"),
      Err(_) => trace!(generation, "batch task cancelled"),
    }

    let mut remaining = Vec::with_capacity(self.waiters.len());
    for (target, ack) in self.waiters.drain(..) {
      if target <= generation {
        let _ = ack.send(());
      } else {
        remaining.push((target, ack));
      }
    }
    self.waiters = remaining;
  }
}

async fn join_inflight(inflight: Option<&mut Inflight>) -> Result<Result<(), BatchError>, JoinError> {
  match inflight {
    Some(inflight) => (&mut inflight.handle).await,
    None => std::future::pending().await,
  }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}
