//! Process execution.

use crate::errors::{classify_io, ErrorCode, OpError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tracing::debug;

/// Options for [`CommandRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOptions {
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Fail with `COMMAND_FAILED` on a non-zero exit.
    pub check: bool,
    /// Path the command is known to create or overwrite.
    ///
    /// Inside a transaction this path is backed up before the command runs
    /// and restored (or deleted) on rollback.
    pub creates: Option<PathBuf>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: Vec::new(),
            check: true,
            creates: None,
        }
    }
}

impl ExecOptions {
    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Disables exit-status checking.
    #[must_use]
    pub const fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }

    /// Declares the path the command creates.
    #[must_use]
    pub fn with_creates(mut self, path: impl Into<PathBuf>) -> Self {
        self.creates = Some(path.into());
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` and waits for it to finish.
    async fn run(&self, command: &str, options: &ExecOptions) -> Result<CommandOutput, OpError>;
}

/// Runs commands through `sh -c` (`cmd /C` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    /// Creates a shell runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn command(line: &str) -> tokio::process::Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = tokio::process::Command::new("cmd");
            cmd.arg("/C");
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = tokio::process::Command::new("sh");
            cmd.arg("-c");
            cmd
        };
        cmd.arg(line);
        cmd
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, options: &ExecOptions) -> Result<CommandOutput, OpError> {
        let mut cmd = Self::command(command);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(command = %command, cwd = ?options.cwd, "exec");
        let output = cmd
            .output()
            .await
            .map_err(|err| classify_io(&err, "exec", options.cwd.as_deref()))?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if options.check && !result.success() {
            return Err(OpError::new(
                ErrorCode::CommandFailed,
                "exec",
                format!("command exited with status {}", result.exit_code),
            )
            .with_details(serde_json::json!({
                "command": command,
                "exit_code": result.exit_code,
                "stderr": result.stderr,
            })));
        }
        Ok(result)
    }
}
