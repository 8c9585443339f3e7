//! Bounded caching primitives for descriptor synchronization.
//!
//! [`BoundedCache`] is the generic capacity-bounded store with inline
//! LRU compaction; [`DescriptorStore`] specializes it into the
//! process-wide content-addressed checksum → descriptor store.

mod bounded;
mod store;

pub use bounded::BoundedCache;
pub use store::{DescriptorStore, StoreError};
