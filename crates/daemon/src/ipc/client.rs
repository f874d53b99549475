//! Control-socket client used by the `status`, `sessions` and `stop`
//! subcommands.
//!
//! Every call opens its own connection, sends one request and reads one
//! reply, all under a single deadline. Replies are mapped to typed results;
//! an `Error` reply from the daemon becomes [`IpcError::Daemon`].

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::messages::{IpcRequest, IpcResponse, IpcSessionInfo};
use super::server::IpcError;

/// Deadline for one request, connect included.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Daemon status as reported over the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonStatus {
    /// False once a stop has been requested.
    pub running: bool,
    /// Seconds since the daemon started.
    pub uptime_secs: u64,
    /// Open client sessions.
    pub session_count: usize,
}

/// Talks to a running daemon through its control socket.
#[derive(Debug, Clone)]
pub struct ControlClient {
    path: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    /// Client for the socket at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }

    /// Replace the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The socket this client dials.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a daemon answers on the socket.
    pub async fn is_daemon_running(&self) -> bool {
        matches!(self.request(IpcRequest::Ping).await, Ok(IpcResponse::Pong))
    }

    /// Uptime and session count.
    pub async fn status(&self) -> Result<DaemonStatus, IpcError> {
        match self.request(IpcRequest::Status).await? {
            IpcResponse::Status {
                running,
                uptime_secs,
                session_count,
            } => Ok(DaemonStatus {
                running,
                uptime_secs,
                session_count,
            }),
            other => Err(rejected(other)),
        }
    }

    /// Open sessions, oldest first as the daemon lists them.
    pub async fn sessions(&self) -> Result<Vec<IpcSessionInfo>, IpcError> {
        match self.request(IpcRequest::ListSessions).await? {
            IpcResponse::Sessions { sessions } => Ok(sessions),
            other => Err(rejected(other)),
        }
    }

    /// Close the session with `session_id`.
    pub async fn kill_session(&self, session_id: &str) -> Result<(), IpcError> {
        let request = IpcRequest::KillSession {
            session_id: session_id.to_string(),
        };
        match self.request(request).await? {
            IpcResponse::SessionKilled { session_id: killed } if killed == session_id => Ok(()),
            other => Err(rejected(other)),
        }
    }

    /// Ask the daemon to shut down. Returns once the request is acknowledged,
    /// not once the daemon has exited.
    pub async fn stop(&self) -> Result<(), IpcError> {
        match self.request(IpcRequest::Stop).await? {
            IpcResponse::Stopping => Ok(()),
            other => Err(rejected(other)),
        }
    }

    /// Send one request and return the raw reply.
    pub async fn request(&self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        tracing::debug!(path = %self.path.display(), request = ?request, "Control request");
        match tokio::time::timeout(self.timeout, self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(IpcError::Timeout(self.timeout)),
        }
    }

    async fn exchange(&self, request: &IpcRequest) -> Result<IpcResponse, IpcError> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|source| IpcError::Unavailable {
                path: self.path.clone(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;
        write_half.flush().await?;

        let mut reply = String::new();
        if BufReader::new(read_half).read_line(&mut reply).await? == 0 {
            return Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed the control connection",
            )));
        }
        Ok(serde_json::from_str(reply.trim())?)
    }
}

fn rejected(response: IpcResponse) -> IpcError {
    match response {
        IpcResponse::Error { message } => IpcError::Daemon(message),
        other => IpcError::UnexpectedResponse(format!("{other:?}")),
    }
}
