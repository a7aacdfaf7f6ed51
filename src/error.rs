//! Server error types.

use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by command handlers to the dispatcher.
///
/// Numeric replies are sent by handlers directly through the broker; the
/// variants here are the outcomes the dispatcher itself must act on:
/// terminate the connection, either cleanly or with an `ERROR` line.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Close the connection with `ERROR :<reason>` (resource errors:
    /// flood, queue overflow, oversize line).
    #[error("closing connection: {0}")]
    Close(String),

    /// Clean QUIT; the quit fanout has already been performed.
    #[error("client quit")]
    Quit,

    /// The outbound channel to this client is gone; treat as a clean quit.
    #[error("send error: {0}")]
    Send(#[from] mpsc::error::SendError<std::sync::Arc<loom_proto::Message>>),
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Errors raised by the S2S link layer.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The peer introduced a SID that is already present in the topology.
    #[error("duplicate SID introduced: {0}")]
    DuplicateSid(String),

    /// The peer failed password or SID validation during handshake.
    #[error("link handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Protocol violation on an established link.
    #[error("link protocol error: {0}")]
    Protocol(String),

    /// Transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec failure.
    #[error(transparent)]
    Codec(#[from] loom_proto::ProtocolError),
}
