//! Client side of the RemoteCtl protocol.
//!
//! [`ClientDriver`] mirrors the server session: it sends the auth line, then
//! one request at a time, and reads each reply to completion before the next
//! request goes out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use protocol::{
    validate_file_name, Connection, Message, ProtocolError, Response, ResponseAccumulator,
    DOWNLOAD_KEYWORD, DOWNLOAD_START, UPLOAD_KEYWORD, UPLOAD_READY,
};
use rustls::pki_types::ServerName;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{ClientError, Result};

/// Default timeout for dialing and the TLS handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    /// The file was written locally.
    Saved {
        /// Where the bytes were written.
        path: PathBuf,
        /// Number of bytes written.
        bytes: u64,
    },
    /// The server refused the request, typically because the file is absent.
    Refused(String),
}

/// A connection to the daemon speaking the line protocol.
pub struct ClientDriver<S> {
    conn: Connection<S>,
    authenticated: bool,
}

impl ClientDriver<TlsStream<TcpStream>> {
    /// Dial `addr` and complete the TLS handshake, verifying the server
    /// certificate against `server_name`.
    pub async fn connect(addr: &str, server_name: &str, connector: &TlsConnector) -> Result<Self> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| ClientError::ServerName(format!("{server_name}: {e}")))?;

        let tcp = tokio::time::timeout(DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(addr.to_string()))?
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        let tls = tokio::time::timeout(DEFAULT_CONNECT_TIMEOUT, connector.connect(name, tcp))
            .await
            .map_err(|_| ClientError::Timeout(addr.to_string()))?
            .map_err(|e| ClientError::Handshake(e.to_string()))?;

        tracing::info!(addr = %addr, "Connected to daemon");
        Ok(Self::new(tls))
    }
}

impl<S> ClientDriver<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Wrap an already established stream.
    pub fn new(stream: S) -> Self {
        Self {
            conn: Connection::new(stream),
            authenticated: false,
        }
    }

    /// Whether the server accepted our credentials.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Send the auth line and read exactly one reply line.
    ///
    /// Returns `false` when the server rejects the credentials; it closes the
    /// connection afterwards.
    pub async fn authenticate(&mut self, login: &str, password: &str) -> Result<bool> {
        self.conn.send(&Message::auth(login, password)?).await?;

        let line = self.expect_line("authentication reply").await?;
        match Message::decode(&line) {
            Message::AuthSuccess => {
                tracing::info!(login = %login, "Authenticated");
                self.authenticated = true;
                Ok(true)
            }
            Message::AuthFailed => {
                tracing::warn!(login = %login, "Authentication rejected");
                Ok(false)
            }
            _ => {
                tracing::debug!("Unexpected authentication reply: {}", line);
                Ok(false)
            }
        }
    }

    /// Run a shell command on the server and return its aggregated reply.
    pub async fn execute_command(&mut self, command: &str) -> Result<Response> {
        if command.contains(['\n', '\r']) {
            return Err(ClientError::InvalidCommand(
                "commands must fit on one line".to_string(),
            ));
        }
        self.conn.send(&Message::Command(command.to_string())).await?;
        Ok(self.conn.read_response().await?)
    }

    /// Upload a local file under its own file name.
    pub async fn upload_file(&mut self, path: &Path) -> Result<Response> {
        self.upload_file_with_progress(path, |_| {}).await
    }

    /// Upload a local file, reporting the running byte count after every chunk.
    pub async fn upload_file_with_progress<F>(
        &mut self,
        path: &Path,
        progress: F,
    ) -> Result<Response>
    where
        F: FnMut(u64),
    {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ProtocolError::InvalidFileName {
                name: path.display().to_string(),
            })?;
        validate_file_name(name)?;

        let mut file = File::open(path)
            .await
            .map_err(|e| ClientError::file(path, e))?;

        self.conn
            .send(&Message::Command(format!("{UPLOAD_KEYWORD} {name}")))
            .await?;

        let line = self.expect_line("upload reply").await?;
        if Message::decode(&line) != Message::Result(UPLOAD_READY.to_string()) {
            // Refused before any bytes: the rest of the reply is still queued.
            return self.finish_response(&line).await;
        }

        let sent = self.conn.send_file(&mut file, progress).await;
        let response = self.conn.read_response().await?;
        match sent {
            Ok(bytes) => {
                tracing::info!(file = %name, bytes, "Upload finished");
                Ok(response)
            }
            Err(ProtocolError::TransferFailed(reason)) => Err(ClientError::file(
                path,
                std::io::Error::other(reason),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Download `name` into `dest_dir/name`.
    pub async fn download_file(&mut self, name: &str, dest_dir: &Path) -> Result<Download> {
        self.download_file_with_progress(name, dest_dir, |_| {})
            .await
    }

    /// Download `name`, reporting the running byte count after every chunk.
    ///
    /// When the local file cannot be created the incoming bytes are still
    /// drained so the connection stays usable, and the local error is returned.
    pub async fn download_file_with_progress<F>(
        &mut self,
        name: &str,
        dest_dir: &Path,
        progress: F,
    ) -> Result<Download>
    where
        F: FnMut(u64),
    {
        validate_file_name(name)?;
        self.conn
            .send(&Message::Command(format!("{DOWNLOAD_KEYWORD} {name}")))
            .await?;

        let line = self.expect_line("download reply").await?;
        match Response::from_line(&line) {
            Response::Result(text) if text.starts_with(DOWNLOAD_START) => {}
            Response::Error(reason) => return Ok(Download::Refused(reason)),
            Response::Result(_) | Response::Unexpected(_) => {
                return Err(ClientError::UnexpectedReply(line));
            }
        }

        let dest = dest_dir.join(name);
        let mut file = match File::create(&dest).await {
            Ok(file) => file,
            Err(e) => {
                self.conn
                    .receive_file(&mut tokio::io::sink(), |_| {})
                    .await?;
                return Err(ClientError::file(dest, e));
            }
        };

        let received = self.conn.receive_file(&mut file, progress).await?;
        if let Some(e) = received.sink_error {
            return Err(ClientError::file(dest, e));
        }

        tracing::info!(file = %name, bytes = received.bytes, "Download finished");
        Ok(Download::Saved {
            path: dest,
            bytes: received.bytes,
        })
    }

    /// Send the disconnect token and close the stream. Calling it again is a
    /// no-op.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.conn.is_closed() {
            return Ok(());
        }
        match self.conn.send(&Message::Disconnect).await {
            Ok(()) => {}
            Err(e) if e.is_connection_closed() => {
                tracing::debug!("Server already closed the connection");
            }
            Err(e) => return Err(e.into()),
        }
        self.conn.shutdown().await?;
        self.authenticated = false;
        Ok(())
    }

    async fn expect_line(&mut self, what: &str) -> Result<String> {
        self.conn.read_reply_line().await?.ok_or_else(|| {
            ClientError::Protocol(ProtocolError::ConnectionClosed(format!(
                "stream ended before {what}"
            )))
        })
    }

    /// Read the rest of a reply whose first line was already consumed.
    async fn finish_response(&mut self, first: &str) -> Result<Response> {
        let mut accumulator = ResponseAccumulator::new();
        if let Some(response) = accumulator.push(first) {
            return Ok(response);
        }
        loop {
            let line = self.expect_line("end of response").await?;
            if let Some(response) = accumulator.push(&line) {
                return Ok(response);
            }
        }
    }
}
