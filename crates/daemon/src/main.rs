//! RemoteCtl Daemon
//!
//! TLS service for remote command execution and file transfer.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
#[cfg(unix)]
use daemon::ipc::DaemonStatus;
use daemon::{CredentialStore, DaemonOrchestrator};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Length of generated account passwords.
const GENERATED_PASSWORD_LEN: usize = 20;

/// RemoteCtl Daemon - remote command execution and file transfer over TLS.
#[derive(Parser, Debug)]
#[command(name = "remotectl-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the RemoteCtl daemon in the foreground
    Start,

    /// Stop the running daemon
    Stop {
        /// Timeout in seconds for graceful shutdown (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show daemon status
    Status,

    /// Manage active sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),

    /// Manage login accounts
    #[command(subcommand)]
    Users(UsersCommands),

    /// Manage TLS certificates
    #[command(subcommand)]
    Certs(CertsCommands),
}

/// Subcommands for session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List all active sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Close an active session
    Kill {
        /// Session ID to close
        session_id: String,
    },
}

/// Subcommands for account management.
#[derive(Subcommand, Debug, Clone)]
pub enum UsersCommands {
    /// Add an account, or reset the password of an existing one
    Add {
        /// Login name
        login: String,

        /// Password (a random one is generated and printed if omitted)
        #[arg(long, short)]
        password: Option<String>,
    },

    /// Remove an account
    Remove {
        /// Login name
        login: String,
    },

    /// List accounts
    List,
}

/// Subcommands for certificate management.
#[derive(Subcommand, Debug, Clone)]
pub enum CertsCommands {
    /// Generate a self-signed certificate and key
    Generate {
        /// Host names or IP addresses the certificate is valid for
        #[arg(long = "host", default_values_t = vec!["localhost".to_string()])]
        hosts: Vec<String>,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();
    config.validate()?;

    match cli.command {
        Commands::Start => {
            let _journal_guard = init_daemon_logging(&config, cli.verbose)?;
            tracing::info!(config = %config_path.display(), "RemoteCtl daemon starting...");
            run_daemon(config).await?;
        }
        Commands::Stop { timeout } => {
            init_cli_logging(cli.verbose);
            match stop_daemon(timeout).await {
                Ok(()) => println!("Daemon stopped successfully"),
                Err(e) => {
                    eprintln!("Failed to stop daemon: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => {
            init_cli_logging(cli.verbose);
            match query_daemon_status().await {
                Ok(status) => {
                    println!(
                        "Daemon Status: {}",
                        if status.running { "running" } else { "stopping" }
                    );
                    println!("  Uptime:   {}", format_duration(status.uptime_secs));
                    println!("  Sessions: {}", status.session_count);
                }
                Err(e) => {
                    eprintln!("Failed to query status: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Sessions(cmd) => {
            init_cli_logging(cli.verbose);
            match cmd {
                SessionsCommands::List { json } => match query_sessions_list().await {
                    Ok(sessions) => {
                        if json {
                            println!("{}", serde_json::to_string_pretty(&sessions)?);
                        } else {
                            print_sessions_table(&sessions);
                        }
                    }
                    Err(e) => {
                        eprintln!("Failed to list sessions: {}", e);
                        std::process::exit(1);
                    }
                },
                SessionsCommands::Kill { session_id } => match kill_session(&session_id).await {
                    Ok(()) => println!("Session {} closed", session_id),
                    Err(e) => {
                        eprintln!("Failed to close session {}: {}", session_id, e);
                        std::process::exit(1);
                    }
                },
            }
        }
        Commands::Users(cmd) => {
            init_cli_logging(cli.verbose);
            let store = CredentialStore::open(config.credentials_path())?;

            match cmd {
                UsersCommands::Add { login, password } => {
                    let generated = password.is_none();
                    let password = password.unwrap_or_else(generate_password);
                    let created = store.add_user(&login, &password)?;
                    store.save()?;

                    if created {
                        println!("Added account {}", login);
                    } else {
                        println!("Updated password for {}", login);
                    }
                    if generated {
                        println!("Password: {}", password);
                    }
                }
                UsersCommands::Remove { login } => {
                    if store.remove_user(&login)?.is_some() {
                        store.save()?;
                        println!("Removed account {}", login);
                    } else {
                        eprintln!("No such account: {}", login);
                        std::process::exit(1);
                    }
                }
                UsersCommands::List => {
                    let users = store.list_users()?;
                    if users.is_empty() {
                        println!("No accounts configured.");
                    } else {
                        println!("Accounts:");
                        for user in users {
                            let created = user
                                .created_at
                                .duration_since(std::time::UNIX_EPOCH)
                                .map(|d| format_relative_time(d.as_secs()))
                                .unwrap_or_else(|_| "-".to_string());
                            println!("  {} (added {})", user.login, created);
                        }
                    }
                }
            }
        }
        Commands::Certs(CertsCommands::Generate { hosts, force }) => {
            init_cli_logging(cli.verbose);
            let cert_path = config.cert_path();
            let key_path = config.key_path();

            let generated = daemon::tls::generate_self_signed(&hosts)?;
            daemon::tls::write_generated(&generated, &cert_path, &key_path, force)?;

            println!("Certificate: {}", cert_path.display());
            println!("Private key: {}", key_path.display());
            println!("Valid for:   {}", hosts.join(", "));
            println!();
            println!("Clients must trust the certificate file, e.g.:");
            println!("  remotectl --ca {} --login <login> <host>", cert_path.display());
        }
    }

    Ok(())
}

/// Install the daemon subscriber: console output plus, if enabled, the
/// journal file. The returned guard flushes the journal when dropped.
fn init_daemon_logging(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = env_filter(&config.daemon.log_level, verbose);
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if !config.daemon.journal {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .init();
        return Ok(None);
    }

    let journal_path = config.journal_path();
    let journal_dir = journal_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&journal_dir).with_context(|| {
        format!("Failed to create journal directory {}", journal_dir.display())
    })?;
    let file_name = journal_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "journal.log".into());

    let appender = tracing_appender::rolling::never(&journal_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .init();

    Ok(Some(guard))
}

/// Console-only subscriber for one-shot commands.
fn init_cli_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(env_filter("warn", verbose))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// `RUST_LOG` wins; otherwise `--verbose` or the configured level.
fn env_filter(level: &str, verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { level };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Run the daemon until a signal or a control socket `Stop` request.
async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let orchestrator = DaemonOrchestrator::new(config)?;
    #[cfg(unix)]
    let orchestrator = orchestrator.with_control_socket(daemon::ipc::get_socket_path());
    let mut orchestrator = orchestrator;

    orchestrator.start().await?;
    if let Some(addr) = orchestrator.local_addr() {
        tracing::info!(addr = %addr, "Daemon ready");
    }

    let shutdown = orchestrator.shutdown_token();
    tokio::select! {
        result = wait_for_shutdown_signal() => {
            result?;
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested");
        }
    }

    orchestrator.stop().await?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Received Ctrl-C");
    Ok(())
}

/// Status information returned from the daemon.
#[cfg(not(unix))]
struct DaemonStatus {
    running: bool,
    uptime_secs: u64,
    session_count: usize,
}

#[cfg(unix)]
fn control_client() -> daemon::ipc::ControlClient {
    daemon::ipc::ControlClient::new(daemon::ipc::get_socket_path())
}

/// Query the daemon status via IPC.
#[cfg(unix)]
async fn query_daemon_status() -> anyhow::Result<DaemonStatus> {
    Ok(control_client().status().await?)
}

/// Query the list of active sessions from the daemon.
#[cfg(unix)]
async fn query_sessions_list() -> anyhow::Result<Vec<daemon::ipc::IpcSessionInfo>> {
    Ok(control_client().sessions().await?)
}

/// Close a specific session by ID via IPC.
#[cfg(unix)]
async fn kill_session(session_id: &str) -> anyhow::Result<()> {
    Ok(control_client().kill_session(session_id).await?)
}

/// Gracefully stop the daemon via IPC and wait for its socket to go away.
#[cfg(unix)]
async fn stop_daemon(timeout_secs: u64) -> anyhow::Result<()> {
    use std::time::{Duration, Instant};

    let timeout = Duration::from_secs(timeout_secs);
    let client = control_client().with_timeout(timeout);

    println!("Sending shutdown request...");
    client.stop().await.context("Failed to send stop request")?;
    println!("Shutdown acknowledged, waiting for daemon to exit...");

    let liveness = client.with_timeout(Duration::from_millis(100));
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !liveness.path().exists() || !liveness.is_daemon_running().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    anyhow::bail!("Timeout waiting for daemon to exit ({}s)", timeout_secs)
}

#[cfg(not(unix))]
async fn query_daemon_status() -> anyhow::Result<DaemonStatus> {
    anyhow::bail!("The control socket is only available on Unix")
}

#[cfg(not(unix))]
async fn query_sessions_list() -> anyhow::Result<Vec<serde_json::Value>> {
    anyhow::bail!("The control socket is only available on Unix")
}

#[cfg(not(unix))]
async fn kill_session(_session_id: &str) -> anyhow::Result<()> {
    anyhow::bail!("The control socket is only available on Unix")
}

#[cfg(not(unix))]
async fn stop_daemon(_timeout_secs: u64) -> anyhow::Result<()> {
    anyhow::bail!("The control socket is only available on Unix")
}

#[cfg(not(unix))]
fn print_sessions_table(_sessions: &[serde_json::Value]) {}

/// Print sessions in a formatted ASCII table.
#[cfg(unix)]
fn print_sessions_table(sessions: &[daemon::ipc::IpcSessionInfo]) {
    if sessions.is_empty() {
        println!("No active sessions.");
        return;
    }

    let id_width = sessions.iter().map(|s| s.id.len()).max().unwrap_or(8).max(8);
    let peer_width = sessions.iter().map(|s| s.peer.len()).max().unwrap_or(4).max(4);
    let login_width = sessions
        .iter()
        .map(|s| s.login.as_ref().map(|l| l.len()).unwrap_or(1))
        .max()
        .unwrap_or(5)
        .max(5);

    println!(
        "{:<id_width$}  {:<peer_width$}  {:<login_width$}  {:>12}",
        "ID", "PEER", "LOGIN", "CONNECTED",
    );
    println!("{}", "-".repeat(id_width + peer_width + login_width + 18));

    for session in sessions {
        println!(
            "{:<id_width$}  {:<peer_width$}  {:<login_width$}  {:>12}",
            truncate_str(&session.id, id_width),
            session.peer,
            session.login.as_deref().unwrap_or("-"),
            format_relative_time(session.connected_at),
        );
    }

    println!();
    println!("Total: {} session(s)", sessions.len());
}

/// Format a Unix timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let elapsed = now.saturating_sub(timestamp);

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
