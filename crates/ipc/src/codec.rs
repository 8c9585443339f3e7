//! Frame codec for the project-info stream.
//!
//! Wire format, per frame: `[1-byte tag][4-byte little-endian length]
//! [length payload bytes]`. The payload of an update frame is opaque;
//! the payload of a remove frame is a UTF-8 project identifier.

use crate::message::{MAX_FRAME_LEN, ProjectInfoMessage, TAG_REMOVE, TAG_UPDATE};
use std::io::ErrorKind;
use tagsync_core::ProjectId;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum FrameError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Unknown message tag {0:#04x}")]
  UnknownTag(u8),

  #[error("Frame length {0} exceeds the {MAX_FRAME_LEN} byte limit")]
  FrameTooLarge(u32),

  #[error("Remove payload is not valid UTF-8: {0}")]
  InvalidIdentifier(#[from] std::string::FromUtf8Error),
}

/// Write one framed message. Does not flush; the caller flushes once
/// per batch of frames.
pub async fn write_message<W>(writer: &mut W, message: &ProjectInfoMessage) -> Result<(), FrameError>
where
  W: AsyncWrite + Unpin,
{
  match message {
    ProjectInfoMessage::Update { payload } => {
      writer.write_u8(TAG_UPDATE).await?;
      write_block(writer, payload).await
    }
    ProjectInfoMessage::Remove { project } => {
      writer.write_u8(TAG_REMOVE).await?;
      write_block(writer, project.as_str().as_bytes()).await
    }
  }
}

/// Read one framed message. `Ok(None)` is a clean end of stream (EOF
/// on a frame boundary); EOF inside a frame is an error.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<ProjectInfoMessage>, FrameError>
where
  R: AsyncRead + Unpin,
{
  let tag = match reader.read_u8().await {
    Ok(tag) => tag,
    Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
    Err(e) => return Err(e.into()),
  };

  match tag {
    TAG_UPDATE => {
      let payload = read_block(reader).await?;
      Ok(Some(ProjectInfoMessage::Update { payload }))
    }
    TAG_REMOVE => {
      let bytes = read_block(reader).await?;
      let project = ProjectId::new(String::from_utf8(bytes)?);
      Ok(Some(ProjectInfoMessage::Remove { project }))
    }
    other => Err(FrameError::UnknownTag(other)),
  }
}

async fn write_block<W>(writer: &mut W, bytes: &[u8]) -> Result<(), FrameError>
where
  W: AsyncWrite + Unpin,
{
  if bytes.len() as u64 > MAX_FRAME_LEN as u64 {
    return Err(FrameError::FrameTooLarge(bytes.len().min(u32::MAX as usize) as u32));
  }
  writer.write_u32_le(bytes.len() as u32).await?;
  writer.write_all(bytes).await?;
  Ok(())
}

async fn read_block<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
  R: AsyncRead + Unpin,
{
  let len = reader.read_u32_le().await?;
  if len > MAX_FRAME_LEN {
    return Err(FrameError::FrameTooLarge(len));
  }
  let mut buf = vec![0u8; len as usize];
  reader.read_exact(&mut buf).await?;
  Ok(buf)
}
