//! Configuration system for tagsync.
//!
//! Config priority: `TAGSYNC_CONFIG` env override > user
//! (~/.config/tagsync/config.toml) > built-in defaults. A missing file
//! yields defaults; a file that exists but fails to parse is an error,
//! not a silent fallback.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

// ============================================================================
// Section configs
// ============================================================================

/// Descriptor store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Maximum number of descriptors retained before compaction (default: 4096)
  pub descriptor_capacity: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      descriptor_capacity: 4096,
    }
  }
}

/// Work coalescing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
  /// Debounce window in milliseconds before a batch flushes (default: 250)
  pub debounce_ms: u64,
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self { debounce_ms: 250 }
  }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TransportConfig {
  /// Socket path override. When unset the owning process derives one
  /// from the runtime dir.
  pub socket_path: Option<PathBuf>,
}

// ============================================================================
// Top-level config
// ============================================================================

/// Top-level configuration for a sync session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
  pub cache: CacheConfig,
  pub batch: BatchConfig,
  pub transport: TransportConfig,
}

impl SyncConfig {
  /// Load the configuration, falling back to defaults when no file exists.
  pub fn load() -> Result<Self, ConfigError> {
    match Self::config_path() {
      Some(path) if path.exists() => Self::load_from(&path),
      _ => Ok(Self::default()),
    }
  }

  /// Load configuration from a specific file.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Resolve the config file path.
  pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TAGSYNC_CONFIG") {
      return Some(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("tagsync").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("tagsync").join("config.toml"))
  }
}
