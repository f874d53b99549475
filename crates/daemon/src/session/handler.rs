//! Per-connection protocol state machine.
//!
//! A session reads exactly one auth line, then serves commands and
//! transfers one at a time until the client disconnects, the stream fails,
//! or the session is cancelled. The stream is shut down on every exit path.

use std::fmt;
use std::sync::Arc;

use protocol::{CommandRequest, Connection, Message, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;

use super::registry::SessionHandle;
use crate::auth::Authenticator;
use crate::executor::CommandExecutor;
use crate::transfer::{ActiveTransfer, FileTransferEngine};

/// Reply text for a non-command line after authentication.
pub const UNEXPECTED_MESSAGE: &str = "Unexpected message";

/// Where a session is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream accepted, nothing read yet.
    Connected,
    /// Waiting for the auth line.
    AwaitingAuth,
    /// Waiting for the next command.
    Authenticated,
    /// Running a shell command.
    Dispatching,
    /// Running an upload or download.
    Transferring,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connected => "connected",
            SessionState::AwaitingAuth => "awaiting_auth",
            SessionState::Authenticated => "authenticated",
            SessionState::Dispatching => "dispatching",
            SessionState::Transferring => "transferring",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Services shared by every session.
pub struct SessionContext {
    /// Runs shell commands.
    pub executor: CommandExecutor,
    /// Serves uploads and downloads.
    pub engine: FileTransferEngine,
    /// Checks credentials.
    pub authenticator: Arc<dyn Authenticator>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("executor", &self.executor)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// One client connection.
pub struct Session<S> {
    conn: Connection<S>,
    handle: Arc<SessionHandle>,
    context: Arc<SessionContext>,
    state: SessionState,
    active_transfer: Option<ActiveTransfer>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Wrap an established stream.
    pub fn new(stream: S, handle: Arc<SessionHandle>, context: Arc<SessionContext>) -> Self {
        Self {
            conn: Connection::new(stream),
            handle,
            context,
            state: SessionState::Connected,
            active_transfer: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion. Returns the final state, which is
    /// always [`SessionState::Closed`].
    pub async fn run(mut self) -> SessionState {
        let span = tracing::info_span!(
            "session",
            session_id = %self.handle.id(),
            peer = %self.handle.peer(),
            login = tracing::field::Empty,
        );

        async move {
            let cancel = self.handle.cancel_token().clone();
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(state = %self.state, "Session cancelled");
                    Ok(())
                }
                result = self.drive() => result,
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_connection_closed() => {
                    tracing::info!("Connection closed: {}", e);
                }
                Err(e) => {
                    tracing::warn!(state = %self.state, "Session failed: {}", e);
                }
            }

            if let Some(transfer) = self.active_transfer.take() {
                tracing::warn!(
                    file = %transfer.file_name,
                    bytes = transfer.bytes,
                    "Transfer interrupted"
                );
            }
            self.close().await;
            self.state
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Result<(), ProtocolError> {
        self.state = SessionState::AwaitingAuth;
        if !self.authenticate().await? {
            return Ok(());
        }
        self.state = SessionState::Authenticated;

        loop {
            let Some(line) = self.conn.read_line().await? else {
                tracing::info!("Client closed the connection");
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }

            match Message::decode(&line) {
                Message::Disconnect => {
                    tracing::info!("Client disconnected");
                    return Ok(());
                }
                Message::Command(payload) => self.dispatch(&payload).await?,
                other => {
                    tracing::debug!(message = ?other, "Unexpected message");
                    self.reply_error(UNEXPECTED_MESSAGE).await?;
                }
            }
        }
    }

    /// Returns `Ok(true)` if the client is now authenticated.
    async fn authenticate(&mut self) -> Result<bool, ProtocolError> {
        let Some(line) = self.conn.read_line().await? else {
            tracing::debug!("Stream ended before authentication");
            let _ = self.conn.send(&Message::AuthFailed).await;
            return Ok(false);
        };

        let Message::Auth { login, password } = Message::decode(&line) else {
            tracing::warn!("Malformed authentication line");
            self.conn.send(&Message::AuthFailed).await?;
            return Ok(false);
        };

        let authenticator = Arc::clone(&self.context.authenticator);
        let candidate = login.clone();
        let accepted =
            tokio::task::spawn_blocking(move || authenticator.authenticate(&candidate, &password))
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("Authenticator panicked: {}", e);
                    false
                });

        if !accepted {
            tracing::warn!(login = %login, "Authentication failed");
            self.conn.send(&Message::AuthFailed).await?;
            return Ok(false);
        }

        self.handle.set_login(&login);
        tracing::Span::current().record("login", login.as_str());
        self.conn.send(&Message::AuthSuccess).await?;
        tracing::info!("Authenticated");
        Ok(true)
    }

    async fn dispatch(&mut self, payload: &str) -> Result<(), ProtocolError> {
        let request = match CommandRequest::parse(payload) {
            Ok(request) => request,
            Err(e) => return self.reply_error(&e.to_string()).await,
        };

        match request {
            CommandRequest::Upload(name) => {
                self.state = SessionState::Transferring;
                tracing::info!(file = %name, "Upload requested");
                self.context
                    .engine
                    .upload(&mut self.conn, name, &mut self.active_transfer)
                    .await?;
            }
            CommandRequest::Download(name) => {
                self.state = SessionState::Transferring;
                tracing::info!(file = %name, "Download requested");
                self.context
                    .engine
                    .download(&mut self.conn, name, &mut self.active_transfer)
                    .await?;
            }
            CommandRequest::Shell(command) => {
                self.state = SessionState::Dispatching;
                tracing::info!(
                    login = self.handle.login().unwrap_or_default(),
                    command = %command,
                    "Executing command"
                );
                let reply = match self.context.executor.run(command).await {
                    Ok(output) => Message::Result(output.trim_end_matches('\n').to_string()),
                    Err(e) => {
                        tracing::warn!(command = %command, "Command failed: {}", e);
                        Message::Error(e.to_string())
                    }
                };
                self.conn.send(&reply).await?;
                self.conn.send(&Message::EndOfResponse).await?;
            }
        }

        self.state = SessionState::Authenticated;
        Ok(())
    }

    async fn reply_error(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.conn.send(&Message::Error(text.to_string())).await?;
        self.conn.send(&Message::EndOfResponse).await
    }

    async fn close(&mut self) {
        self.state = SessionState::Closed;
        if let Err(e) = self.conn.shutdown().await {
            tracing::debug!("Stream shutdown failed: {}", e);
        }
    }
}
