//! Shared data model and configuration for tagsync.
//!
//! Everything that crosses a crate boundary lives here: checksums,
//! descriptors, project identities, delta results, and the layered
//! TOML configuration.

mod config;
mod types;

pub use config::{BatchConfig, CacheConfig, ConfigError, SyncConfig, TransportConfig};
pub use types::{CHECKSUM_LEN, Checksum, DeltaResult, Descriptor, ProjectId, ResultId};
