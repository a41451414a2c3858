//! Commit message generation
//!
//! Checkpoint commits get their message from a [`CommitMessageGenerator`]
//! when one is configured. Whatever goes wrong there (no generator, an
//! error, an empty answer, a timeout) the template message is used instead.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{Error, Result};

/// Produces a commit message from a summary of the staged diff
#[async_trait]
pub trait CommitMessageGenerator: Send + Sync {
    /// Get the name of this generator
    fn name(&self) -> &'static str;

    /// Generate a message for the commit being made in `workdir`
    async fn generate(&self, workdir: &Path, diff_summary: &str) -> Result<String>;
}

/// Message used when no generated message is available
pub fn template_message(files_changed: usize) -> String {
    format!("Auto-commit: {} files changed", files_changed)
}

/// Ask `generator` for a message, bounded by `timeout`
///
/// Falls back to [`template_message`] on absence, failure, timeout or an
/// empty answer.
pub async fn message_or_template(
    generator: Option<&dyn CommitMessageGenerator>,
    workdir: &Path,
    diff_summary: &str,
    files_changed: usize,
    timeout: Duration,
) -> String {
    let Some(generator) = generator else {
        return template_message(files_changed);
    };

    match tokio::time::timeout(timeout, generator.generate(workdir, diff_summary)).await {
        Ok(Ok(message)) if !message.trim().is_empty() => message.trim().to_string(),
        Ok(Ok(_)) => {
            tracing::warn!(generator = generator.name(), "Generator returned an empty message");
            template_message(files_changed)
        }
        Ok(Err(e)) => {
            tracing::warn!(generator = generator.name(), error = %e, "Message generation failed");
            template_message(files_changed)
        }
        Err(_) => {
            tracing::warn!(
                generator = generator.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Message generation timed out"
            );
            template_message(files_changed)
        }
    }
}

/// Runs an external command in the project root that reads the diff
/// summary on stdin and prints the message on stdout
#[derive(Debug, Clone)]
pub struct CommandMessageGenerator {
    command: String,
}

impl CommandMessageGenerator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl CommitMessageGenerator for CommandMessageGenerator {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn generate(&self, workdir: &Path, diff_summary: &str) -> Result<String> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // A generator that ignores stdin may close it early
            if let Err(e) = stdin.write_all(diff_summary.as_bytes()).await {
                tracing::debug!(error = %e, "Message generator closed stdin");
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: self.command.clone(),
                output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl CommitMessageGenerator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn generate(&self, _workdir: &Path, _diff_summary: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Slow;

    #[async_trait]
    impl CommitMessageGenerator for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn generate(&self, _workdir: &Path, _diff_summary: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".to_string())
        }
    }

    #[test]
    fn test_template_message() {
        assert_eq!(template_message(3), "Auto-commit: 3 files changed");
    }

    #[tokio::test]
    async fn test_no_generator_uses_template() {
        let msg = message_or_template(None, Path::new("."), "", 2, Duration::from_secs(1)).await;
        assert_eq!(msg, "Auto-commit: 2 files changed");
    }

    #[tokio::test]
    async fn test_generated_message_is_trimmed() {
        let generator = Fixed("  Add login form\n");
        let msg = message_or_template(Some(&generator), Path::new("."), "", 2, Duration::from_secs(1)).await;
        assert_eq!(msg, "Add login form");
    }

    #[tokio::test]
    async fn test_empty_message_uses_template() {
        let generator = Fixed("   ");
        let msg = message_or_template(Some(&generator), Path::new("."), "", 4, Duration::from_secs(1)).await;
        assert_eq!(msg, "Auto-commit: 4 files changed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_uses_template() {
        let msg = message_or_template(Some(&Slow), Path::new("."), "", 1, Duration::from_secs(10)).await;
        assert_eq!(msg, "Auto-commit: 1 files changed");
    }

    #[tokio::test]
    async fn test_command_generator_reads_stdin() {
        let generator = CommandMessageGenerator::new("read first; echo \"Summary: $first\"");
        let msg = generator.generate(Path::new("."), "2 files changed\n").await.unwrap();
        assert_eq!(msg, "Summary: 2 files changed");
    }

    #[tokio::test]
    async fn test_command_generator_failure() {
        let generator = CommandMessageGenerator::new("echo broken >&2; exit 3");
        let err = generator.generate(Path::new("."), "").await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_command_generator_runs_in_workdir() {
        let dir = tempfile::TempDir::new().unwrap();
        let generator = CommandMessageGenerator::new("pwd -P");
        let msg = generator.generate(dir.path(), "").await.unwrap();
        assert_eq!(
            std::fs::canonicalize(msg).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }
}
