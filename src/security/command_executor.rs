//! SafeCommandExecutor: whitelisted, shell-free execution of external tools
//!
//! # Security Features
//!
//! - **Whitelist-based validation**: only `git` may run
//! - **Injection prevention**: arguments are passed as a vector, never through a shell
//! - **Working directory validation**: checked before every invocation
//! - **Timeout control**: hung processes are killed
//! - **Redaction**: registered secrets are masked in captured stderr
//!
//! # Example
//!
//! ```rust,no_run
//! use release_mirror::security::SafeCommandExecutor;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), release_mirror::security::CommandError> {
//! let mut executor = SafeCommandExecutor::new(std::env::temp_dir())?;
//! executor.set_timeout(Duration::from_secs(30));
//!
//! let stdout = executor.run("git", &["--version".to_string()]).await?;
//! println!("{}", stdout);
//! # Ok(())
//! # }
//! ```

use crate::security::token_manager::mask_secrets_in;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Commands SafeCommandExecutor will start
const ALLOWED_COMMANDS: &[&str] = &["git"];

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command is not in the allowed whitelist
    #[error("Command '{0}' is not in the allowed whitelist")]
    CommandNotAllowed(String),

    /// Working directory does not exist or is not accessible
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    /// Command could not be started (binary not found, permission denied)
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Command exceeded the timeout duration
    #[error("Command timeout after {0:?}")]
    Timeout(Duration),

    /// Command ran and exited non-zero; stderr is already redacted
    #[error("'{command}' exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
}

impl CommandError {
    /// Captured stderr for failed invocations
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Safe command executor with security controls
#[derive(Debug, Clone)]
pub struct SafeCommandExecutor {
    working_dir: PathBuf,
    timeout: Option<Duration>,
    envs: Vec<(String, String)>,
    redactions: Vec<String>,
}

impl SafeCommandExecutor {
    /// Create a new executor; the working directory must exist.
    pub fn new<P: AsRef<Path>>(working_dir: P) -> Result<Self, CommandError> {
        let working_dir = working_dir.as_ref().to_path_buf();

        if !working_dir.exists() {
            return Err(CommandError::InvalidWorkingDirectory(working_dir));
        }

        Ok(Self {
            working_dir,
            timeout: None,
            envs: Vec::new(),
            redactions: Vec::new(),
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Environment variable set on every spawned process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Value masked wherever it shows up in captured output
    pub fn with_redaction(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.redactions.push(secret);
        }
        self
    }

    /// Execute a whitelisted command and return its raw output.
    pub async fn execute(&self, command: &str, args: &[String]) -> Result<Output, CommandError> {
        if !ALLOWED_COMMANDS.contains(&command) {
            return Err(CommandError::CommandNotAllowed(command.to_string()));
        }
        if !self.working_dir.is_dir() {
            return Err(CommandError::InvalidWorkingDirectory(
                self.working_dir.clone(),
            ));
        }

        debug!(
            command,
            args = %self.redact(&args.join(" ")),
            cwd = %self.working_dir.display(),
            "executing command"
        );

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        let output = cmd.output();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, output)
                .await
                .map_err(|_| CommandError::Timeout(limit))?,
            None => output.await,
        };

        result.map_err(|e| CommandError::ExecutionFailed(e.to_string()))
    }

    /// Execute a command, turning a non-zero exit into [`CommandError::Failed`].
    ///
    /// Returns trimmed stdout.
    pub async fn run(&self, command: &str, args: &[String]) -> Result<String, CommandError> {
        let output = self.execute(command, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CommandError::Failed {
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: self.redact(stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn redact(&self, text: &str) -> String {
        let secrets: Vec<&str> = self.redactions.iter().map(String::as_str).collect();
        mask_secrets_in(text, &secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[tokio::test]
    async fn test_rejected_command_rm() {
        let executor = SafeCommandExecutor::new(std::env::temp_dir()).unwrap();
        let result = executor
            .execute("rm", &["-rf".to_string(), "/".to_string()])
            .await;
        assert!(matches!(result, Err(CommandError::CommandNotAllowed(_))));
    }

    #[tokio::test]
    async fn test_rejected_command_npm() {
        let executor = SafeCommandExecutor::new(std::env::temp_dir()).unwrap();
        let result = executor.execute("npm", &["--version".to_string()]).await;
        assert!(matches!(result, Err(CommandError::CommandNotAllowed(_))));
    }

    #[test]
    fn test_invalid_working_directory() {
        let result = SafeCommandExecutor::new("/nonexistent/directory/that/does/not/exist");
        assert!(matches!(
            result,
            Err(CommandError::InvalidWorkingDirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_git_version() {
        if !git_available() {
            return;
        }
        let executor = SafeCommandExecutor::new(std::env::temp_dir()).unwrap();
        let stdout = executor.run("git", &["--version".to_string()]).await.unwrap();
        assert!(stdout.starts_with("git version"));
    }

    #[tokio::test]
    async fn test_failure_stderr_is_redacted() {
        if !git_available() {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let executor = SafeCommandExecutor::new(temp_dir.path())
            .unwrap()
            .with_redaction("super-secret-branch-name");

        executor.run("git", &["init".to_string()]).await.unwrap();
        let result = executor
            .run(
                "git",
                &[
                    "checkout".to_string(),
                    "super-secret-branch-name".to_string(),
                ],
            )
            .await;

        match result {
            Err(CommandError::Failed { stderr, status, .. }) => {
                assert_ne!(status, 0);
                assert!(!stderr.contains("super-secret-branch-name"));
                assert!(stderr.contains("sup...ame"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
