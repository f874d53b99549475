//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Message errors
    /// A control line could not be parsed.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A well-formed message arrived where a different one was required.
    #[error("unexpected message: {0}")]
    Unexpected(String),

    /// A file name was rejected before any bytes were exchanged.
    #[error("invalid file name: {name}")]
    InvalidFileName {
        /// The rejected name as received.
        name: String,
    },

    // Connection errors
    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    // Transfer errors
    /// File or data transfer failed.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// Any other I/O failure on the underlying stream.
    #[error("i/o error: {0}")]
    Io(String),
}

impl ProtocolError {
    /// Whether the error means the peer is gone and the stream is unusable.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed(_))
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            ErrorKind::InvalidData => ProtocolError::Malformed(err.to_string()),
            _ => ProtocolError::Io(err.to_string()),
        }
    }
}
