//! # RemoteCtl Daemon Library
//!
//! This crate provides the server side of RemoteCtl: authenticated remote
//! command execution and file transfer over TLS.
//!
//! ## Overview
//!
//! - **Sessions**: one task per TLS connection running the line protocol
//! - **Command execution**: each command runs in a fresh host shell
//! - **File transfer**: uploads and downloads rooted in one storage directory
//! - **Authentication**: a pluggable [`Authenticator`], backed by a JSON
//!   credential store in the daemon binary
//! - **Control socket**: local status, session listing and shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Daemon Orchestrator                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   accept + TLS    ┌─────────────────────┐  │
//! │  │   Listener   │ ───────────────▶  │  Session (per task) │  │
//! │  └──────────────┘                   └──────────┬──────────┘  │
//! │         │ register / cancel                    │             │
//! │  ┌──────▼───────┐   ┌──────────────┐  ┌────────▼─────────┐   │
//! │  │   Session    │   │   Command    │  │  File Transfer   │   │
//! │  │   Registry   │   │   Executor   │  │     Engine       │   │
//! │  └──────────────┘   └──────────────┘  └──────────────────┘   │
//! │         ▲                                                    │
//! │  ┌──────┴───────┐                                            │
//! │  │ IPC (status) │                                            │
//! │  └──────────────┘                                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(daemon::config::default_config_path())?;
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod executor;
#[cfg(unix)]
pub mod ipc;
pub mod listener;
pub mod orchestrator;
pub mod session;
pub mod tls;
pub mod transfer;

// Re-export protocol for convenience
pub use protocol;

pub use auth::{Authenticator, CredentialStore};
pub use config::Config;
pub use executor::{CommandExecutor, ExecError};
pub use listener::Listener;
pub use orchestrator::{DaemonOrchestrator, OrchestratorState};
pub use session::{
    Session, SessionContext, SessionHandle, SessionId, SessionInfo, SessionRegistry,
    SessionState,
};
pub use tls::TlsError;
pub use transfer::{FileTransferEngine, TransferError, TransferOutcome};
