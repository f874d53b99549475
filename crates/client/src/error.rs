//! Error types for the client crate.

use std::path::PathBuf;

use protocol::ProtocolError;
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The wire protocol failed or the server went away.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Dialing or the TLS handshake took too long.
    #[error("connection to {0} timed out")]
    Timeout(String),

    /// The TLS handshake was rejected.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// The CA bundle could not be used as a trust anchor.
    #[error("invalid CA certificate: {0}")]
    Certificate(String),

    /// The name used to verify the server certificate is not valid.
    #[error("invalid server name: {0}")]
    ServerName(String),

    /// A local file could not be read or written.
    #[error("{}: {source}", path.display())]
    File {
        /// The local path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A command line cannot be carried by the line protocol.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The server answered with something the protocol does not allow here.
    #[error("unexpected reply from server: {0}")]
    UnexpectedReply(String),
}

impl ClientError {
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ClientError::File {
            path: path.into(),
            source,
        }
    }

    /// Whether the server connection is gone and the driver should be dropped.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ClientError::Protocol(e) if e.is_connection_closed())
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
