use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Length of a checksum in bytes (SHA-256)
pub const CHECKSUM_LEN: usize = 32;

// ============================================================================
// Checksum
// ============================================================================

/// Content identity of a descriptor.
///
/// Two descriptors with equal content have equal checksums; a checksum
/// collision is treated as identity and never independently verified.
/// The all-zero value is reserved as the invalid sentinel and rejected
/// by the descriptor store.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
  /// The reserved all-zero sentinel. Never produced by [`Checksum::of`].
  pub const EMPTY: Checksum = Checksum([0u8; CHECKSUM_LEN]);

  /// Compute the checksum of a byte slice.
  pub fn of(content: &[u8]) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(content);
    Self(hasher.finalize().into())
  }

  /// Wrap raw checksum bytes (e.g. received over the wire).
  pub fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self {
    Self(bytes)
  }

  /// Parse a checksum from its hex representation.
  pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
    let mut bytes = [0u8; CHECKSUM_LEN];
    hex::decode_to_slice(hex_str, &mut bytes)?;
    Ok(Self(bytes))
  }

  pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
    &self.0
  }

  /// Whether this is the reserved all-zero sentinel.
  pub fn is_empty(&self) -> bool {
    self.0 == [0u8; CHECKSUM_LEN]
  }
}

impl fmt::Display for Checksum {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&hex::encode(self.0))
  }
}

impl fmt::Debug for Checksum {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Abbreviated prefix keeps log lines readable
    write!(f, "Checksum({})", &hex::encode(&self.0[..6]))
  }
}

impl Serialize for Checksum {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(self.0))
  }
}

impl<'de> Deserialize<'de> for Checksum {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Checksum::from_hex(&s).map_err(serde::de::Error::custom)
  }
}

// ============================================================================
// Descriptor
// ============================================================================

/// An immutable, expensive-to-compute metadata record.
///
/// Descriptors are opaque to this core: they are produced by the
/// external resolver, stored by checksum, and replaced wholesale,
/// never patched in place. Cloning is cheap (shared payload).
#[derive(Clone, PartialEq, Eq)]
pub struct Descriptor {
  bytes: Arc<[u8]>,
}

impl Descriptor {
  pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
    Self { bytes: bytes.into() }
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  /// Derive the content identity of this descriptor.
  pub fn checksum(&self) -> Checksum {
    Checksum::of(&self.bytes)
  }
}

impl fmt::Debug for Descriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Descriptor({} bytes, {:?})", self.bytes.len(), self.checksum())
  }
}

// ============================================================================
// Project identity and versioning
// ============================================================================

/// Identity of a logical compilation unit whose descriptor set changes
/// over time. In the source domain this is the project file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn into_string(self) -> String {
    self.0
  }
}

impl fmt::Display for ProjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ProjectId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// Monotonic per-project version number stamping a checksum-set
/// snapshot. The first stored snapshot of a project gets id 1; the id
/// increases by exactly one each time the snapshot actually changes.
/// "No prior version" is `Option::<ResultId>::None` at API boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(u64);

impl ResultId {
  /// Id of the first snapshot ever stored for a project.
  pub const FIRST: ResultId = ResultId(1);

  pub fn new(id: u64) -> Self {
    Self(id)
  }

  pub fn get(self) -> u64 {
    self.0
  }

  #[must_use]
  pub fn next(self) -> Self {
    Self(self.0 + 1)
  }
}

impl fmt::Display for ResultId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

// ============================================================================
// Delta result
// ============================================================================

/// Added/removed checksum sets between two snapshots of a project's
/// descriptor set, stamped with the snapshot's result id.
///
/// `is_incremental == false` signals the caller had no valid prior
/// version: the delta is a full baseline expressed as an add-only
/// delta. Ordering within `added`/`removed` is not meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaResult {
  pub is_incremental: bool,
  pub result_id: ResultId,
  pub added: Vec<Checksum>,
  pub removed: Vec<Checksum>,
}

impl DeltaResult {
  /// True when the delta carries no changes.
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.removed.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn checksum_of_is_deterministic() {
    let a = Checksum::of(b"descriptor content");
    let b = Checksum::of(b"descriptor content");
    let c = Checksum::of(b"other content");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(!a.is_empty());
  }

  #[test]
  fn checksum_hex_round_trip() {
    let original = Checksum::of(b"round trip");
    let parsed = Checksum::from_hex(&original.to_string()).unwrap();
    assert_eq!(original, parsed);
  }

  #[test]
  fn checksum_rejects_bad_hex() {
    assert!(Checksum::from_hex("not hex").is_err());
    // Wrong length
    assert!(Checksum::from_hex("abcd").is_err());
  }

  #[test]
  fn checksum_serde_is_hex_string() {
    let checksum = Checksum::of(b"serde");
    let json = serde_json::to_string(&checksum).unwrap();
    assert_eq!(json, format!("\"{}\"", checksum));
    let back: Checksum = serde_json::from_str(&json).unwrap();
    assert_eq!(back, checksum);
  }

  #[test]
  fn empty_sentinel_is_flagged() {
    assert!(Checksum::EMPTY.is_empty());
    assert!(!Checksum::of(b"").is_empty());
  }

  #[test]
  fn descriptor_checksum_matches_content() {
    let descriptor = Descriptor::new(&b"payload"[..]);
    assert_eq!(descriptor.checksum(), Checksum::of(b"payload"));
    assert_eq!(descriptor.as_bytes(), b"payload");
    assert_eq!(descriptor.len(), 7);
  }

  #[test]
  fn result_id_increments_by_one() {
    assert_eq!(ResultId::FIRST.get(), 1);
    assert_eq!(ResultId::FIRST.next(), ResultId::new(2));
  }

  #[test]
  fn delta_result_emptiness() {
    let empty = DeltaResult {
      is_incremental: true,
      result_id: ResultId::FIRST,
      added: vec![],
      removed: vec![],
    };
    assert!(empty.is_empty());

    let full = DeltaResult {
      added: vec![Checksum::of(b"x")],
      ..empty
    };
    assert!(!full.is_empty());
  }
}
