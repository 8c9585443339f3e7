//! Debounced, deduplicating, single-flight work coalescing.
//!
//! [`BatchQueue`] absorbs rapid-fire notifications into one batch per
//! quiet period and hands each batch to a [`BatchProcessor`] exactly
//! once, never overlapping with itself.

mod queue;

pub use queue::{BatchError, BatchProcessor, BatchQueue, QueueClosed};
