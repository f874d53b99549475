//! Server side of the UPLOAD/DOWNLOAD sub-protocol.
//!
//! Both directions are rooted in one storage directory and accept only
//! plain file names. Each upload is written to its own hidden temporary
//! file and renamed into place once the end-of-file marker arrives. A
//! failed upload never replaces an existing file, and concurrent uploads of
//! one name never share bytes: the last rename wins.
//!
//! Local faults (bad name, missing file, disk errors) are reported to the
//! client and the session carries on. Only stream faults are returned as
//! errors.

use std::path::{Path, PathBuf};

use protocol::{
    validate_file_name, Connection, Message, ProtocolError, DOWNLOAD_START, FILE_NOT_FOUND,
    UPLOAD_COMPLETE, UPLOAD_READY,
};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite};

const TEMP_SUFFIX: &str = ".upload";

/// Errors local to one transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The client-supplied name is not a plain file name.
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    /// The requested file does not exist.
    #[error("{}: {}", FILE_NOT_FOUND, .0)]
    FileNotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which way the bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Upload,
    /// Server to client.
    Download,
}

/// The transfer a session is currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTransfer {
    /// Which way the bytes flow.
    pub direction: Direction,
    /// Name as sent by the client.
    pub file_name: String,
    /// Bytes moved so far.
    pub bytes: u64,
}

impl ActiveTransfer {
    fn new(direction: Direction, file_name: &str) -> Self {
        Self {
            direction,
            file_name: file_name.to_string(),
            bytes: 0,
        }
    }
}

/// How a transfer ended, when the stream survived it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All bytes moved.
    Completed {
        /// Total bytes transferred.
        bytes: u64,
    },
    /// The client was sent an error reply.
    Failed(String),
}

/// Serves uploads and downloads from one directory.
#[derive(Debug, Clone)]
pub struct FileTransferEngine {
    root: PathBuf,
}

impl FileTransferEngine {
    /// Create an engine rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage directory if it is missing.
    pub async fn ensure_root(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Map a client-supplied name to a path inside the storage directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, TransferError> {
        validate_file_name(name)
            .map(|name| self.root.join(name))
            .map_err(|_| TransferError::InvalidFileName(name.to_string()))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.root.join(format!(".{name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4().simple()))
    }

    /// Receive a file from the client.
    ///
    /// Replies with the ready line, reads raw bytes up to the end-of-file
    /// marker, then replies with the outcome and `END_OF_RESPONSE`. If the
    /// destination cannot be opened, the ready line is replaced by an error
    /// reply and no bytes are read.
    pub async fn upload<S>(
        &self,
        conn: &mut Connection<S>,
        name: &str,
        active: &mut Option<ActiveTransfer>,
    ) -> Result<TransferOutcome, ProtocolError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let result = self.upload_inner(conn, name, active).await;
        *active = None;
        result
    }

    async fn upload_inner<S>(
        &self,
        conn: &mut Connection<S>,
        name: &str,
        active: &mut Option<ActiveTransfer>,
    ) -> Result<TransferOutcome, ProtocolError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let destination = match self.resolve(name) {
            Ok(path) => path,
            Err(e) => return reply_failed(conn, e.to_string(), true).await,
        };
        let temp_path = self.temp_path(name);

        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await;
        let mut file = match created {
            Ok(file) => file,
            Err(e) => {
                return reply_failed(conn, format!("cannot create {name}: {e}"), true).await;
            }
        };

        *active = Some(ActiveTransfer::new(Direction::Upload, name));
        conn.send(&Message::Result(UPLOAD_READY.to_string())).await?;

        let received = conn
            .receive_file(&mut file, |bytes| {
                if let Some(transfer) = active.as_mut() {
                    transfer.bytes = bytes;
                }
            })
            .await;
        drop(file);

        let received = match received {
            Ok(received) => received,
            Err(e) => {
                discard(&temp_path).await;
                return Err(e);
            }
        };

        if let Some(e) = received.sink_error {
            discard(&temp_path).await;
            return reply_failed(conn, format!("failed to store {name}: {e}"), true).await;
        }

        if let Err(e) = fs::rename(&temp_path, &destination).await {
            discard(&temp_path).await;
            return reply_failed(conn, format!("failed to store {name}: {e}"), true).await;
        }

        conn.send(&Message::Result(format!("{UPLOAD_COMPLETE}: {name}")))
            .await?;
        conn.send(&Message::EndOfResponse).await?;

        tracing::info!(file = %name, bytes = received.bytes, "Upload stored");
        Ok(TransferOutcome::Completed {
            bytes: received.bytes,
        })
    }

    /// Send a file to the client.
    ///
    /// A missing or invalid file is answered with a single error line. A
    /// present file is announced with a result line, streamed raw, and
    /// terminated by the end-of-file marker.
    pub async fn download<S>(
        &self,
        conn: &mut Connection<S>,
        name: &str,
        active: &mut Option<ActiveTransfer>,
    ) -> Result<TransferOutcome, ProtocolError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let result = self.download_inner(conn, name, active).await;
        *active = None;
        result
    }

    async fn download_inner<S>(
        &self,
        conn: &mut Connection<S>,
        name: &str,
        active: &mut Option<ActiveTransfer>,
    ) -> Result<TransferOutcome, ProtocolError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let mut file = match self.open_for_download(name).await {
            Ok(file) => file,
            Err(e) => return reply_failed(conn, e.to_string(), false).await,
        };

        *active = Some(ActiveTransfer::new(Direction::Download, name));
        conn.send(&Message::Result(format!("{DOWNLOAD_START}: {name}")))
            .await?;

        let sent = conn
            .send_file(&mut file, |bytes| {
                if let Some(transfer) = active.as_mut() {
                    transfer.bytes = bytes;
                }
            })
            .await;

        match sent {
            Ok(bytes) => {
                tracing::info!(file = %name, bytes, "Download sent");
                Ok(TransferOutcome::Completed { bytes })
            }
            // The source failed; the marker was still written, so the
            // stream is in sync and the session continues.
            Err(ProtocolError::TransferFailed(reason)) => {
                tracing::warn!(file = %name, "Download aborted: {}", reason);
                Ok(TransferOutcome::Failed(reason))
            }
            Err(e) => Err(e),
        }
    }

    async fn open_for_download(&self, name: &str) -> Result<File, TransferError> {
        let path = self.resolve(name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(File::open(&path).await?),
            Ok(_) => Err(TransferError::FileNotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransferError::FileNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Send an error reply, optionally terminated by `END_OF_RESPONSE`.
async fn reply_failed<S>(
    conn: &mut Connection<S>,
    reason: String,
    end_of_response: bool,
) -> Result<TransferOutcome, ProtocolError>
where
    S: AsyncRead + AsyncWrite,
{
    tracing::warn!("Transfer failed: {}", reason);
    conn.send(&Message::Error(reason.clone())).await?;
    if end_of_response {
        conn.send(&Message::EndOfResponse).await?;
    }
    Ok(TransferOutcome::Failed(reason))
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "Failed to remove partial upload: {}", e);
        }
    }
}
