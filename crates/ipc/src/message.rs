use serde::{Deserialize, Serialize};
use tagsync_core::ProjectId;

/// Tag byte for a project-info update frame.
pub const TAG_UPDATE: u8 = 0;

/// Tag byte for a project removal frame.
pub const TAG_REMOVE: u8 = 1;

/// Hard ceiling on a frame's payload length. A length prefix above
/// this is treated as stream corruption, not an allocation request.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// One producer → consumer notification about a project.
///
/// `Update` carries the project's serialized info as an opaque blob
/// (the payload codec is owned by the producer's host, not by this
/// protocol). `Remove` carries the project identifier as UTF-8 and
/// tells consumers to drop all state for that project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectInfoMessage {
  Update { payload: Vec<u8> },
  Remove { project: ProjectId },
}

impl ProjectInfoMessage {
  /// The wire tag byte for this message kind.
  pub fn tag(&self) -> u8 {
    match self {
      ProjectInfoMessage::Update { .. } => TAG_UPDATE,
      ProjectInfoMessage::Remove { .. } => TAG_REMOVE,
    }
  }
}
