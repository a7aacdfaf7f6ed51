//! Error types for the IRC protocol library.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Top-level protocol errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid UTF-8 bytes in a message line.
    #[error("invalid UTF-8 in message")]
    InvalidUtf8,

    /// Message exceeded the maximum allowed length.
    ///
    /// The connection owner is expected to close with `ERROR :Line too long`.
    #[error("line too long: {actual} bytes (limit: {limit})")]
    LineTooLong {
        /// Actual line length.
        actual: usize,
        /// Maximum allowed length.
        limit: usize,
    },

    /// Failed to parse an IRC message.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The invalid message string.
        string: String,
        /// The underlying parse failure.
        #[source]
        cause: MessageParseError,
    },
}

/// Errors produced while parsing a single message.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// The line was empty (or whitespace only).
    #[error("empty message")]
    EmptyMessage,

    /// The command token was missing.
    ///
    /// Per the codec contract such messages are discarded silently by the
    /// caller, but the parser still reports them distinctly.
    #[error("missing command")]
    MissingCommand,

    /// The prefix could not be parsed.
    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),

    /// Parser failure at a byte offset, with context.
    #[error("parse error at byte {position}: {context}")]
    ParseContext {
        /// Byte offset of the failure.
        position: usize,
        /// Human-readable context.
        context: String,
    },
}
