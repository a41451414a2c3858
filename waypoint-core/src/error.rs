//! Error types for Waypoint

use std::time::Duration;

use thiserror::Error;

use crate::rollback::RollbackStep;

/// Result type alias for Waypoint operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Waypoint operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Repository discovery or inspection through libgit2 failed
    #[error("Git error: {0}")]
    Git(String),

    /// Working tree status could not be read
    #[error("Scan failure: {0}")]
    ScanFailure(String),

    /// The command queue is at capacity
    #[error("Command queue is full ({capacity} commands queued)")]
    QueueFull { capacity: usize },

    /// A command waited in the queue longer than the command timeout
    #[error("Command timed out in queue after {waited:?}: {command}")]
    QueueTimeout { command: String, waited: Duration },

    /// The circuit breaker is open and rejects new commands
    #[error("Circuit breaker open after {failures} consecutive failures; retry in {retry_in:?}")]
    CircuitOpen { failures: u32, retry_in: Duration },

    /// The caller went away before the command ran
    #[error("Command cancelled before execution: {0}")]
    Cancelled(String),

    /// The command ran and reported failure
    #[error("Command failed: {command}: {output}")]
    CommandFailed { command: String, output: String },

    /// The branch moved since the operation was scheduled
    #[error("Branch '{branch}' moved: expected {expected}, found {actual}")]
    StaleHead {
        branch: String,
        expected: String,
        actual: String,
    },

    /// The remote refused a non-fast-forward update
    #[error("Push of '{branch}' rejected: {reason}")]
    Rejected { branch: String, reason: String },

    /// No committer identity configured
    #[error("No committer identity configured. Set [identity] name and email in the config file or WAYPOINT_COMMITTER_NAME / WAYPOINT_COMMITTER_EMAIL")]
    MissingIdentity,

    /// The checkpoint commit was created but its hash could not be read
    #[error("Checkpoint committed on '{branch}' but its head could not be read: {message}")]
    HeadUnresolved { branch: String, message: String },

    /// A rollback step failed
    #[error(
        "Rollback failed during {step}: {message}{}{}",
        backup_branch.as_ref().map(|b| format!(" (backup kept at '{}')", b)).unwrap_or_default(),
        if *stash_kept { " (uncommitted changes left in 'git stash')" } else { "" }
    )]
    RollbackFailed {
        step: RollbackStep,
        backup_branch: Option<String>,
        /// Changes stashed before the failure could not be popped back
        stash_kept: bool,
        message: String,
    },

    /// Metadata store error
    #[error("Store error: {0}")]
    Store(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the throttler may retry a command that failed with this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CommandFailed { .. } | Error::Io(_))
    }

    /// Output text attached to a failed command, if any
    pub fn command_output(&self) -> Option<&str> {
        match self {
            Error::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::Git(e.message().to_string())
    }
}
