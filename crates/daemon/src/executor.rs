//! Host shell command execution.
//!
//! Each command runs to completion in a fresh shell process. Standard output
//! lines are kept verbatim; standard error lines follow, each prefixed with
//! `ERROR: `. The exit status is not reported.
//!
//! There is no execution timeout: a command that never exits keeps its
//! session busy until the connection is closed.

use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

use crate::config::SessionConfig;

/// Prefix applied to every standard error line.
pub const STDERR_LINE_PREFIX: &str = "ERROR: ";

/// Errors raised when a command cannot be run at all.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The shell process could not be started or awaited.
    #[error("failed to run command: {0}")]
    Spawn(#[from] std::io::Error),

    /// Nothing to run.
    #[error("empty command")]
    Empty,
}

/// Runs shell commands on the host.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
    shell_arg: String,
}

impl CommandExecutor {
    /// Create an executor for `shell`, which runs its command argument when
    /// invoked as `shell shell_arg <command>`.
    pub fn new(shell: impl Into<String>, shell_arg: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            shell_arg: shell_arg.into(),
        }
    }

    /// Create an executor from the `[session]` configuration section.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.shell.clone(), config.shell_arg.clone())
    }

    /// Run `command` and return its combined output.
    ///
    /// A non-zero exit status is not an error.
    pub async fn run(&self, command: &str) -> Result<String, ExecError> {
        if command.trim().is_empty() {
            return Err(ExecError::Empty);
        }

        let output = Command::new(&self.shell)
            .arg(&self.shell_arg)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        tracing::debug!(
            command = %command,
            status = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "Command finished"
        );

        Ok(format_output(&output.stdout, &output.stderr))
    }
}

/// Join captured output: stdout lines first, then prefixed stderr lines.
/// Every line, including the last, ends with `\n`.
pub fn format_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::with_capacity(stdout.len() + stderr.len());

    for line in String::from_utf8_lossy(stdout).lines() {
        text.push_str(line);
        text.push('\n');
    }
    for line in String::from_utf8_lossy(stderr).lines() {
        text.push_str(STDERR_LINE_PREFIX);
        text.push_str(line);
        text.push('\n');
    }

    text
}
