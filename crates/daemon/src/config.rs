//! Configuration management for the RemoteCtl daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/remotectl/daemon.toml`.
//!
//! Paths left unset in the file (TLS material, storage root, credentials)
//! resolve relative to `daemon.data_dir`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("bind_address must be an IP address, got {0}")]
    InvalidBindAddress(String),

    #[error("max_sessions must be at most 10000 (0 = unlimited), got {0}")]
    InvalidMaxSessions(usize),

    #[error("shell not found: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound accepted for `session.max_sessions`.
const MAX_SESSIONS_LIMIT: usize = 10_000;

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 9999;

/// Main configuration structure for the RemoteCtl daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listening socket configuration.
    pub network: NetworkConfig,

    /// TLS key material.
    pub tls: TlsConfig,

    /// File transfer storage.
    pub storage: StorageConfig,

    /// Session and command execution configuration.
    pub session: SessionConfig,

    /// Credential store location.
    pub auth: AuthConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for daemon data (certificates, credentials, journal, files).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Write the command journal to `<data_dir>/journal.log`.
    pub journal: bool,
}

/// Listening socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address to bind.
    pub bind_address: String,

    /// TCP port to listen on.
    pub port: u16,
}

/// PEM certificate chain and private key for the listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Certificate chain path (default: `<data_dir>/tls/server.crt`).
    pub cert_path: Option<PathBuf>,

    /// Private key path (default: `<data_dir>/tls/server.key`).
    pub key_path: Option<PathBuf>,
}

/// File transfer storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory uploads are written to and downloads are read from
    /// (default: `<data_dir>/server_storage`).
    pub root_dir: Option<PathBuf>,
}

/// Session and command execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell used to run commands.
    pub shell: String,

    /// Argument that makes the shell run the next argument as a command.
    pub shell_arg: String,

    /// Maximum number of concurrent sessions (0 = unlimited).
    pub max_sessions: usize,
}

/// Credential store location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Credential file (default: `<data_dir>/users.json`).
    pub credentials_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            journal: true,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let (shell, shell_arg) = default_shell();
        Self {
            shell,
            shell_arg,
            max_sessions: 0,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remotectl")
        .join("daemon.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remotectl")
}

/// Returns the shell and its command flag for the current platform.
fn default_shell() -> (String, String) {
    if cfg!(windows) {
        ("cmd.exe".to_string(), "/C".to_string())
    } else {
        ("/bin/sh".to_string(), "-c".to_string())
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - REMOTECTL_PORT: Override the listening port
    /// - REMOTECTL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - REMOTECTL_STORAGE_DIR: Override the file storage directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("REMOTECTL_PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.network.port = port;
                    }
                    Err(_) => {
                        tracing::warn!("Ignoring invalid REMOTECTL_PORT value: {}", port);
                    }
                }
            }
        }

        if let Ok(level) = std::env::var("REMOTECTL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(dir) = std::env::var("REMOTECTL_STORAGE_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding storage root_dir from environment: {}", dir);
                self.storage.root_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.port == 0 {
            return Err(ConfigError::InvalidPort(self.network.port));
        }

        if self.network.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.network.bind_address.clone(),
            ));
        }

        if self.session.max_sessions > MAX_SESSIONS_LIMIT {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        let shell_path = Path::new(&self.session.shell);
        let shell_found = if shell_path.is_absolute() {
            shell_path.exists()
        } else {
            which::which(&self.session.shell).is_ok()
        };
        if !shell_found {
            return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Address the listener binds to.
    ///
    /// Call [`Config::validate`] first; an unparsable address falls back to
    /// all interfaces.
    pub fn listen_addr(&self) -> SocketAddr {
        let ip = self
            .network
            .bind_address
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.network.port)
    }

    /// Resolved TLS certificate chain path.
    pub fn cert_path(&self) -> PathBuf {
        self.tls
            .cert_path
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir.join("tls").join("server.crt"))
    }

    /// Resolved TLS private key path.
    pub fn key_path(&self) -> PathBuf {
        self.tls
            .key_path
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir.join("tls").join("server.key"))
    }

    /// Resolved file storage directory.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage
            .root_dir
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir.join("server_storage"))
    }

    /// Resolved credential store path.
    pub fn credentials_path(&self) -> PathBuf {
        self.auth
            .credentials_path
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir.join("users.json"))
    }

    /// Path of the command journal.
    pub fn journal_path(&self) -> PathBuf {
        self.daemon.data_dir.join("journal.log")
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("REMOTECTL_PORT");
        std::env::remove_var("REMOTECTL_LOG_LEVEL");
        std::env::remove_var("REMOTECTL_STORAGE_DIR");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert!(config.daemon.journal);
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.network.port, 9999);
        assert_eq!(config.session.max_sessions, 0);
        assert!(config.tls.cert_path.is_none());
        assert!(config.storage.root_dir.is_none());
    }

    #[test]
    fn test_default_paths_follow_data_dir() {
        let mut config = Config::default();
        config.daemon.data_dir = PathBuf::from("/srv/remotectl");

        assert_eq!(config.cert_path(), PathBuf::from("/srv/remotectl/tls/server.crt"));
        assert_eq!(config.key_path(), PathBuf::from("/srv/remotectl/tls/server.key"));
        assert_eq!(
            config.storage_dir(),
            PathBuf::from("/srv/remotectl/server_storage")
        );
        assert_eq!(
            config.credentials_path(),
            PathBuf::from("/srv/remotectl/users.json")
        );
        assert_eq!(config.journal_path(), PathBuf::from("/srv/remotectl/journal.log"));
    }

    #[test]
    fn test_explicit_paths_win() {
        let toml = r#"
[tls]
cert_path = "/etc/remotectl/cert.pem"
key_path = "/etc/remotectl/key.pem"

[storage]
root_dir = "/var/lib/files"

[auth]
credentials_path = "/etc/remotectl/users.json"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.cert_path(), PathBuf::from("/etc/remotectl/cert.pem"));
        assert_eq!(config.key_path(), PathBuf::from("/etc/remotectl/key.pem"));
        assert_eq!(config.storage_dir(), PathBuf::from("/var/lib/files"));
        assert_eq!(
            config.credentials_path(),
            PathBuf::from("/etc/remotectl/users.json")
        );
    }

    #[test]
    fn test_default_shell_pair() {
        let (shell, arg) = default_shell();
        if cfg!(windows) {
            assert_eq!(arg, "/C");
            assert!(shell.contains("cmd"));
        } else {
            assert_eq!(shell, "/bin/sh");
            assert_eq!(arg, "-c");
        }
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[network]
port = 7000

[session]
max_sessions = 5
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.network.port, 7000);
        assert_eq!(config.session.max_sessions, 5);
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[network
port = 1
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[network]
port = "not a number"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_from_toml_port_out_of_range() {
        let toml = r#"
[network]
port = 70000
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.daemon.log_level = "warn".to_string();
        original.network.port = 4443;
        original.session.max_sessions = 42;
        original.storage.root_dir = Some(PathBuf::from("/tmp/files"));

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/daemon.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("daemon.toml");

        let mut original = Config::default();
        original.daemon.log_level = "debug".to_string();
        original.session.max_sessions = 15;

        original.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("daemon.toml");

        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("remotectl"));
        assert!(path.to_string_lossy().ends_with("daemon.toml"));
    }

    #[test]
    fn test_listen_addr() {
        let mut config = Config::default();
        config.network.bind_address = "127.0.0.1".to_string();
        config.network.port = 8443;
        assert_eq!(config.listen_addr(), "127.0.0.1:8443".parse().unwrap());
    }

    #[test]
    #[serial]
    fn test_env_override_port() {
        clear_env();
        std::env::set_var("REMOTECTL_PORT", "12345");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.network.port, 12345);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_ignored() {
        clear_env();
        std::env::set_var("REMOTECTL_PORT", "ninety");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.network.port, DEFAULT_PORT);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_log_level_and_storage() {
        clear_env();
        std::env::set_var("REMOTECTL_LOG_LEVEL", "debug");
        std::env::set_var("REMOTECTL_STORAGE_DIR", "/data/uploads");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.storage_dir(), PathBuf::from("/data/uploads"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("REMOTECTL_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "info");

        clear_env();
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_port_zero() {
        let mut config = Config::default();
        config.network.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort(0)));
    }

    #[test]
    fn test_validate_bind_address() {
        let mut config = Config::default();
        config.network.bind_address = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddress("localhost".to_string()))
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_max_sessions_bounds() {
        let mut config = Config::default();

        config.session.max_sessions = 0;
        assert!(config.validate().is_ok());

        config.session.max_sessions = MAX_SESSIONS_LIMIT;
        assert!(config.validate().is_ok());

        config.session.max_sessions = MAX_SESSIONS_LIMIT + 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMaxSessions(MAX_SESSIONS_LIMIT + 1))
        );
    }

    #[test]
    fn test_validate_shell_not_found() {
        let mut config = Config::default();
        config.session.shell = "/nonexistent/path/to/shell".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShellPath(
                "/nonexistent/path/to/shell".to_string()
            ))
        );

        config.session.shell = "nonexistent_shell_xyz".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidShellPath(_))
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_shell_in_path() {
        let mut config = Config::default();
        config.session.shell = "sh".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_log_level() {
        let mut config = Config::default();

        for level in ["trace", "DEBUG", "Info", "warn", "error"] {
            config.daemon.log_level = level.to_string();
            assert!(config.validate().is_ok(), "{level}");
        }

        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }
}
