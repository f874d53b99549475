//! IPC Server for handling CLI connections via Unix Domain Sockets.
//!
//! The server listens on a Unix socket and accepts connections from CLI clients,
//! allowing them to send commands and receive responses.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use super::messages::{IpcRequest, IpcResponse};

/// A server that listens for IPC connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// This will create the socket file and any necessary parent directories.
    /// If a socket file already exists at the path, it will be removed first.
    /// The socket file is removed again when the server is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The parent directories cannot be created
    /// - The existing socket cannot be removed
    /// - The socket cannot be bound
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                restrict_directory(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Path of the socket file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }

    /// Answer requests with `handler` until `shutdown` is cancelled.
    ///
    /// Each client connection is served on its own task and may send any
    /// number of requests.
    pub async fn serve<F>(self, shutdown: CancellationToken, handler: F)
    where
        F: Fn(IpcRequest) -> IpcResponse + Clone + Send + 'static,
    {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.accept() => match accepted {
                    Ok(mut conn) => {
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            loop {
                                let request = match conn.read_request().await {
                                    Ok(Some(request)) => request,
                                    Ok(None) => break,
                                    Err(IpcError::Json(e)) => {
                                        let message = format!("invalid request: {e}");
                                        let reply = IpcResponse::Error { message };
                                        if conn.send_response(&reply).await.is_err() {
                                            break;
                                        }
                                        continue;
                                    }
                                    Err(e) => {
                                        tracing::debug!("IPC read failed: {}", e);
                                        break;
                                    }
                                };
                                tracing::debug!(request = ?request, "IPC request");
                                let response = handler(request);
                                if let Err(e) = conn.send_response(&response).await {
                                    tracing::debug!("IPC write failed: {}", e);
                                    break;
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept IPC connection: {}", e);
                    }
                },
            }
        }
        tracing::debug!(path = %self.path.display(), "IPC server stopped");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn restrict_directory(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

/// A connection to an IPC client.
///
/// This struct wraps a Unix stream and provides methods for reading
/// requests and sending responses using JSON newline-delimited protocol.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the next request from the client.
    ///
    /// Returns `None` if the client has disconnected.
    pub async fn read_request(&mut self) -> Result<Option<IpcRequest>, IpcError> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let request = serde_json::from_str(line.trim())?;
        Ok(Some(request))
    }

    /// Send a response to the client.
    pub async fn send_response(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Nothing answers on the control socket.
    #[error("daemon is not running (cannot connect to {}): {}", .path.display(), .source)]
    Unavailable {
        /// Socket that was dialled.
        path: PathBuf,
        /// Connect failure.
        source: io::Error,
    },

    /// The daemon did not reply in time.
    #[error("no reply from daemon within {0:?}")]
    Timeout(std::time::Duration),

    /// The daemon answered with an error.
    #[error("{0}")]
    Daemon(String),

    /// The reply does not match the request.
    #[error("unexpected reply from daemon: {0}")]
    UnexpectedResponse(String),
}
