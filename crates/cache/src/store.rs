//! Process-wide content-addressed descriptor store.
//!
//! The store is the single source of truth consulted before the
//! external resolver is ever asked to recompute a descriptor. It is
//! long-lived and shared (`Arc<DescriptorStore>`); all synchronization
//! is internal.

use crate::BoundedCache;
use std::num::NonZeroUsize;
use tagsync_core::{Checksum, Descriptor};
use thiserror::Error;
use tracing::debug;

const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
  #[error("The empty checksum is not a valid descriptor identity")]
  EmptyChecksum,
}

/// Checksum → descriptor store with bounded capacity.
///
/// A checksum identifies its descriptor's content, so a duplicate
/// insert is always benign: the existing entry wins and the call
/// succeeds.
pub struct DescriptorStore {
  cache: BoundedCache<Checksum, Descriptor>,
}

impl DescriptorStore {
  pub fn new(capacity: NonZeroUsize) -> Self {
    Self {
      cache: BoundedCache::new(capacity),
    }
  }

  /// Idempotent insert. Present-with-equal-content is a no-op success;
  /// the reserved empty checksum is rejected.
  pub fn try_add(&self, checksum: Checksum, descriptor: Descriptor) -> Result<(), StoreError> {
    if checksum.is_empty() {
      return Err(StoreError::EmptyChecksum);
    }

    if let Some(existing) = self.cache.try_get(&checksum) {
      if existing != descriptor {
        // Collision is treated as identity; the first writer wins
        debug!(%checksum, "descriptor already present with different content, keeping existing");
      }
      return Ok(());
    }

    self.cache.set(checksum, descriptor);
    Ok(())
  }

  pub fn try_get(&self, checksum: &Checksum) -> Option<Descriptor> {
    self.cache.try_get(checksum)
  }

  pub fn len(&self) -> usize {
    self.cache.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cache.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.cache.capacity()
  }
}

impl Default for DescriptorStore {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn descriptor(content: &[u8]) -> (Checksum, Descriptor) {
    let descriptor = Descriptor::new(content);
    (descriptor.checksum(), descriptor)
  }

  #[test]
  fn add_then_get() {
    let store = DescriptorStore::default();
    let (checksum, descriptor) = descriptor(b"one");

    store.try_add(checksum.clone(), descriptor.clone()).unwrap();
    assert_eq!(store.try_get(&checksum), Some(descriptor));
  }

  #[test]
  fn duplicate_add_is_idempotent() {
    let store = DescriptorStore::default();
    let (checksum, descriptor) = descriptor(b"dup");

    store.try_add(checksum.clone(), descriptor.clone()).unwrap();
    store.try_add(checksum.clone(), descriptor.clone()).unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(store.try_get(&checksum), Some(descriptor));
  }

  #[test]
  fn colliding_add_keeps_first_writer() {
    let store = DescriptorStore::default();
    let (checksum, original) = descriptor(b"original");

    store.try_add(checksum.clone(), original.clone()).unwrap();
    // Same identity, different bytes: treated as identity, no overwrite
    store
      .try_add(checksum.clone(), Descriptor::new(&b"imposter"[..]))
      .unwrap();

    assert_eq!(store.try_get(&checksum), Some(original));
  }

  #[test]
  fn empty_checksum_is_rejected() {
    let store = DescriptorStore::default();
    let result = store.try_add(Checksum::EMPTY, Descriptor::new(&b"x"[..]));
    assert_eq!(result, Err(StoreError::EmptyChecksum));
    assert!(store.is_empty());
  }

  #[test]
  fn bounded_capacity_applies() {
    let store = DescriptorStore::new(NonZeroUsize::new(8).unwrap());
    for i in 0..64u32 {
      let (checksum, d) = descriptor(&i.to_le_bytes());
      store.try_add(checksum, d).unwrap();
    }
    assert!(store.len() <= store.capacity());
  }
}
