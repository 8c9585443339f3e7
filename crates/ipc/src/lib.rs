mod codec;
mod message;

pub use codec::{FrameError, read_message, write_message};
pub use message::{MAX_FRAME_LEN, ProjectInfoMessage, TAG_REMOVE, TAG_UPDATE};
