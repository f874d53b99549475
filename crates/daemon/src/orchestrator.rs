//! Daemon orchestrator for wiring together all components.
//!
//! The `DaemonOrchestrator` builds the session services from configuration,
//! runs the TLS listener and the control socket, and coordinates shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::{Authenticator, CredentialStore};
use crate::config::Config;
use crate::executor::CommandExecutor;
use crate::listener::Listener;
use crate::session::{SessionContext, SessionRegistry};
use crate::transfer::FileTransferEngine;

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, initializing components.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    config: Config,
    state: Arc<RwLock<OrchestratorState>>,
    acceptor: TlsAcceptor,
    context: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    control_socket: Option<PathBuf>,
    shutdown_token: CancellationToken,
    started_at: Instant,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl DaemonOrchestrator {
    /// Creates an orchestrator from configuration, loading the credential
    /// store and TLS material from the configured paths.
    pub fn new(config: Config) -> Result<Self> {
        let credentials_path = config.credentials_path();
        let store = CredentialStore::open(&credentials_path).with_context(|| {
            format!(
                "Failed to load credentials from {}",
                credentials_path.display()
            )
        })?;
        if store.is_empty()? {
            tracing::warn!(
                "No users configured; add one with `remotectl-daemon users add <login>`"
            );
        }

        let acceptor = crate::tls::load_acceptor(&config.cert_path(), &config.key_path())
            .context("Failed to load TLS certificate (generate one with `remotectl-daemon certs generate`)")?;

        Ok(Self::with_components(config, acceptor, Arc::new(store)))
    }

    /// Creates an orchestrator from already-built TLS and authentication
    /// components.
    pub fn with_components(
        config: Config,
        acceptor: TlsAcceptor,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let context = Arc::new(SessionContext {
            executor: CommandExecutor::from_config(&config.session),
            engine: FileTransferEngine::new(config.storage_dir()),
            authenticator,
        });

        Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            acceptor,
            context,
            registry: Arc::new(SessionRegistry::new()),
            control_socket: None,
            shutdown_token: CancellationToken::new(),
            started_at: Instant::now(),
            local_addr: None,
            tasks: Vec::new(),
        }
    }

    /// Serve the control socket at `path` once started.
    pub fn with_control_socket(mut self, path: PathBuf) -> Self {
        self.control_socket = Some(path);
        self
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// The live session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Token cancelled when the daemon should stop, either by [`stop`] or by
    /// a control socket `Stop` request.
    ///
    /// [`stop`]: DaemonOrchestrator::stop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Starts the listener and, if configured, the control socket.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }

        info!("Starting daemon orchestrator...");

        if let Err(e) = self.start_components().await {
            *self.state.write().await = OrchestratorState::Stopped;
            self.shutdown_token.cancel();
            return Err(e);
        }

        *self.state.write().await = OrchestratorState::Running;
        info!("Daemon orchestrator started successfully");
        Ok(())
    }

    async fn start_components(&mut self) -> Result<()> {
        self.context.engine.ensure_root().await.with_context(|| {
            format!(
                "Failed to create storage directory {}",
                self.context.engine.root().display()
            )
        })?;
        debug!(root = %self.context.engine.root().display(), "Storage directory ready");

        let addr = self.config.listen_addr();
        let listener = Listener::bind(
            addr,
            self.acceptor.clone(),
            Arc::clone(&self.context),
            Arc::clone(&self.registry),
            self.config.session.max_sessions,
        )
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
        self.local_addr = Some(listener.local_addr()?);

        self.started_at = Instant::now();
        let shutdown = self.shutdown_token.clone();
        self.tasks
            .push(tokio::spawn(async move { listener.run(shutdown).await }));

        if let Some(path) = self.control_socket.clone() {
            let task = self.spawn_control_socket(&path).await?;
            self.tasks.push(task);
        }

        Ok(())
    }

    #[cfg(unix)]
    async fn spawn_control_socket(&self, path: &std::path::Path) -> Result<JoinHandle<()>> {
        use crate::ipc::{ControlClient, IpcServer};

        let existing = ControlClient::new(path).with_timeout(std::time::Duration::from_secs(1));
        if path.exists() && existing.is_daemon_running().await {
            anyhow::bail!("Another daemon is already running (control socket {})", path.display());
        }

        let server = IpcServer::bind(path)
            .await
            .with_context(|| format!("Failed to bind control socket {}", path.display()))?;
        info!(path = %path.display(), "Control socket listening");

        let handler = ControlHandler {
            registry: Arc::clone(&self.registry),
            shutdown: self.shutdown_token.clone(),
            started_at: self.started_at,
        };
        let shutdown = self.shutdown_token.clone();
        Ok(tokio::spawn(async move {
            server.serve(shutdown, move |request| handler.handle(request)).await
        }))
    }

    #[cfg(not(unix))]
    async fn spawn_control_socket(&self, _path: &std::path::Path) -> Result<JoinHandle<()>> {
        tracing::warn!("Control socket is not supported on this platform");
        Ok(tokio::spawn(async {}))
    }

    /// Stops the daemon gracefully: closes the listener, ends every session
    /// and waits for their tasks.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }

        info!(sessions = self.registry.len(), "Stopping daemon orchestrator...");

        self.shutdown_token.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("Daemon task failed: {}", e);
            }
        }

        *self.state.write().await = OrchestratorState::Stopped;
        info!("Daemon orchestrator stopped");
        Ok(())
    }
}

/// Answers control socket requests.
#[cfg(unix)]
#[derive(Clone)]
struct ControlHandler {
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    started_at: Instant,
}

#[cfg(unix)]
impl ControlHandler {
    fn handle(&self, request: crate::ipc::IpcRequest) -> crate::ipc::IpcResponse {
        use crate::ipc::{IpcRequest, IpcResponse};

        match request {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Status => IpcResponse::Status {
                running: !self.shutdown.is_cancelled(),
                uptime_secs: self.started_at.elapsed().as_secs(),
                session_count: self.registry.len(),
            },
            IpcRequest::ListSessions => IpcResponse::Sessions {
                sessions: self
                    .registry
                    .snapshot()
                    .into_iter()
                    .map(Into::into)
                    .collect(),
            },
            IpcRequest::KillSession { session_id } => {
                if self.registry.cancel(&session_id) {
                    info!(session_id = %session_id, "Session closed by control request");
                    IpcResponse::SessionKilled { session_id }
                } else {
                    IpcResponse::Error {
                        message: format!("Session not found: {session_id}"),
                    }
                }
            }
            IpcRequest::Stop => {
                info!("Stop requested over control socket");
                self.shutdown.cancel();
                IpcResponse::Stopping
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{acceptor_from_pem, generate_self_signed};
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.daemon.data_dir = temp_dir.path().to_path_buf();
        config.network.bind_address = "127.0.0.1".to_string();
        config.network.port = 0;
        config
    }

    fn test_acceptor() -> TlsAcceptor {
        let generated = generate_self_signed(&["localhost".to_string()]).unwrap();
        acceptor_from_pem(generated.cert_pem.as_bytes(), generated.key_pem.as_bytes()).unwrap()
    }

    fn orchestrator(temp_dir: &TempDir) -> DaemonOrchestrator {
        DaemonOrchestrator::with_components(
            test_config(temp_dir),
            test_acceptor(),
            Arc::new(|_: &str, _: &str| false),
        )
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = orchestrator(&temp_dir);
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);
        assert!(orchestrator.local_addr().unwrap().port() > 0);
        assert!(temp_dir.path().join("server_storage").is_dir());

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = orchestrator(&temp_dir);
        orchestrator.start().await.unwrap();
        assert!(orchestrator.start().await.is_err());
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = orchestrator(&temp_dir);
        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }

    #[test]
    fn test_new_without_certificate_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = DaemonOrchestrator::new(test_config(&temp_dir))
            .err()
            .unwrap();
        assert!(err.to_string().contains("TLS certificate"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_control_socket_status_and_stop() {
        use crate::ipc::{ControlClient, IpcError};

        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("run").join("daemon.sock");
        let mut orchestrator = orchestrator(&temp_dir).with_control_socket(socket_path.clone());
        orchestrator.start().await.unwrap();

        let client = ControlClient::new(&socket_path);
        assert!(client.is_daemon_running().await);

        let status = client.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.session_count, 0);

        assert!(client.sessions().await.unwrap().is_empty());
        assert!(matches!(
            client.kill_session("missing").await.unwrap_err(),
            IpcError::Daemon(_)
        ));

        client.stop().await.unwrap();
        assert!(orchestrator.shutdown_token().is_cancelled());

        orchestrator.stop().await.unwrap();
        assert!(!socket_path.exists());
    }
}
