//! Command execution against a working directory
//!
//! Every git invocation Waypoint makes goes through a [`CommandGateway`].
//! The gateway only runs text commands; deciding whether a nominally
//! successful result actually failed is the job of [`detect_failure`].

pub mod classify;

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{Error, Result};

pub use classify::{classify, detect_failure, FailureKind, FailureSignal, PATTERNS};

/// Trait for executing shell commands in a working directory
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// Get the name of this gateway
    fn name(&self) -> &'static str;

    /// Run `command` inside `workdir` and return its output
    async fn execute(&self, workdir: &Path, command: &str) -> Result<String>;
}

/// Gateway that runs commands through the local `sh`
#[derive(Debug, Clone)]
pub struct ShellGateway {
    shell: String,
}

impl ShellGateway {
    /// Create a gateway using `sh`
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different POSIX shell
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Default for ShellGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandGateway for ShellGateway {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn execute(&self, workdir: &Path, command: &str) -> Result<String> {
        if !workdir.exists() {
            return Err(Error::Config(format!(
                "Working directory does not exist: {}",
                workdir.display()
            )));
        }

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::Config(format!("Shell not found at '{}'", self.shell))
                } else {
                    Error::Io(e)
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let combined = if stdout.trim().is_empty() {
                stderr
            } else {
                format!("{}\n{}", stderr.trim_end(), stdout.trim_end())
            };
            return Err(Error::CommandFailed {
                command: command.to_string(),
                output: combined.trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_shell_gateway_runs_in_workdir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let gateway = ShellGateway::new();
        let out = gateway.execute(dir.path(), "ls").await.unwrap();
        assert!(out.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_shell_gateway_nonzero_exit() {
        let dir = TempDir::new().unwrap();
        let gateway = ShellGateway::new();
        let err = gateway
            .execute(dir.path(), "echo 'fatal: nope' >&2; exit 3")
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { output, .. } => assert!(output.contains("fatal: nope")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_shell_gateway_missing_workdir() {
        let gateway = ShellGateway::new();
        let result = gateway.execute(Path::new("/nonexistent/path/12345"), "ls").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
