//! Producer → consumer sync channel for project-info notifications.
//!
//! The producer side coalesces change/remove notifications through a
//! [`batch::BatchQueue`] and writes framed messages to an ordered byte
//! stream; the consumer side runs a dedicated reader loop that
//! dispatches each frame to a handler. Transport endpoint naming and
//! reconnection policy belong to the owning process; this crate only
//! provides the loops and thin Unix-socket helpers.

mod consumer;
mod producer;
#[cfg(unix)]
mod transport;

pub use consumer::{ChannelError, HandlerError, ProjectInfoConsumer, ProjectInfoHandler};
pub use producer::{ProducerWork, ProjectInfoProducer, ProjectInfoSource, SourceError};
#[cfg(unix)]
pub use transport::{ConnectError, accept_one, bind_listener, connect_with_retry, default_socket_path};
