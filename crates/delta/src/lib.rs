//! Per-project incremental delta engine.
//!
//! Turns a project's new full checksum set into an add/remove delta
//! relative to the previously retained snapshot, version-stamped with
//! a monotonic per-project result id so repeated polls stay cheap.

mod engine;

pub use engine::DeltaEngine;
