//! Generic capacity-bounded key→value store with LRU-style eviction.
//!
//! Eviction is always inline: an insert that pushes the store over
//! capacity runs a synchronous compaction pass before returning, so
//! there is no background eviction task to manage. Reads only bump an
//! atomic access stamp and never take a write lock on unrelated keys.

use dashmap::DashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

struct Entry<V> {
  value: V,
  last_access: AtomicU64,
}

/// Key→value store with a hard capacity and least-recently-used
/// eviction.
///
/// After any [`set`](BoundedCache::set) call returns, `len()` is at or
/// below capacity. Compaction evicts entries in ascending last-access
/// order down to a watermark slightly below the hard limit, which
/// amortizes the cost of repeated compactions across bursts of inserts.
pub struct BoundedCache<K, V> {
  entries: DashMap<K, Entry<V>>,
  capacity: usize,
  watermark: usize,
  clock: AtomicU64,
  // Serializes compaction passes; racing over-capacity inserts would
  // otherwise evict twice as much as needed.
  compaction: Mutex<()>,
}

impl<K, V> BoundedCache<K, V>
where
  K: Eq + Hash + Clone,
  V: Clone,
{
  /// Create a cache holding at most `capacity` entries. A nonpositive
  /// capacity is unrepresentable by construction.
  pub fn new(capacity: NonZeroUsize) -> Self {
    let capacity = capacity.get();
    // Evict down to 7/8 of capacity, keeping at least one slot free
    let watermark = (capacity - capacity / 8).max(1);
    Self {
      entries: DashMap::new(),
      capacity,
      watermark,
      clock: AtomicU64::new(0),
      compaction: Mutex::new(()),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Insert or overwrite unconditionally. Runs an inline compaction
  /// pass before returning when the insert pushed the store over
  /// capacity.
  pub fn set(&self, key: K, value: V) {
    let stamp = self.tick();
    self.entries.insert(
      key,
      Entry {
        value,
        last_access: AtomicU64::new(stamp),
      },
    );

    if self.entries.len() > self.capacity {
      self.compact();
    }
  }

  /// Look up a value and bump its last-access marker.
  pub fn try_get(&self, key: &K) -> Option<V> {
    let entry = self.entries.get(key)?;
    entry.last_access.store(self.tick(), Ordering::Relaxed);
    Some(entry.value.clone())
  }

  /// Whether the key is currently present. Does not bump the
  /// last-access marker.
  pub fn contains(&self, key: &K) -> bool {
    self.entries.contains_key(key)
  }

  fn tick(&self) -> u64 {
    self.clock.fetch_add(1, Ordering::Relaxed) + 1
  }

  /// Evict entries in ascending last-access order until the store is
  /// at or below the watermark.
  fn compact(&self) {
    let _guard = match self.compaction.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };

    // A racing insert may have already compacted on our behalf
    if self.entries.len() <= self.capacity {
      return;
    }

    let mut by_age: Vec<(K, u64)> = self
      .entries
      .iter()
      .map(|entry| (entry.key().clone(), entry.value().last_access.load(Ordering::Relaxed)))
      .collect();
    by_age.sort_unstable_by_key(|(_, stamp)| *stamp);

    let mut evicted = 0usize;
    for (key, _) in by_age {
      if self.entries.len() <= self.watermark {
        break;
      }
      if self.entries.remove(&key).is_some() {
        evicted += 1;
      }
    }

    trace!(evicted, len = self.entries.len(), "cache compaction complete");
  }
}
