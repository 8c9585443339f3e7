//! Consumer-side composition root.
//!
//! A [`SyncSession`] owns the descriptor store, the delta engine, and
//! the resolver seam, and exposes the two query operations an editor
//! host calls: `tag_helpers_delta` and `fetch_descriptors`. Sessions
//! are explicitly constructed and owned by the host (shared via `Arc`
//! when needed); nothing here is process-global, so isolated sessions
//! can coexist freely.

mod resolver;
mod session;
mod table;

pub use resolver::{DescriptorResolver, ResolveError};
pub use session::{FetchOutcome, SyncSession};
pub use table::{DecodeError, ProjectInfoDecoder, SessionHandler};
