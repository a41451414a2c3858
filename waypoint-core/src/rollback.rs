//! Rollback engine
//!
//! Resets a project's working tree to an earlier commit or branch. The
//! whole sequence holds the project lock so it can never interleave with a
//! checkpoint.
//!
//! ```text
//! Idle -> Preparing -> Reverting -> Done
//!              \            \
//!               `------------`--> Failed
//! ```
//!
//! Preparing records where the tree was, stashes uncommitted work and
//! creates the backup branch. Nothing destructive happens before the
//! backup exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::command;
use crate::git::status::{non_empty_lines, parse_porcelain_z};
use crate::project::ProjectHandle;
use crate::throttle::Priority;
use crate::{Error, Result};

/// Step of a rollback, reported when it fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackStep {
    ReadHead,
    Stash,
    Backup,
    Resolve,
    Fetch,
    Reset,
}

impl std::fmt::Display for RollbackStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RollbackStep::ReadHead => "read-head",
            RollbackStep::Stash => "stash",
            RollbackStep::Backup => "backup",
            RollbackStep::Resolve => "resolve",
            RollbackStep::Fetch => "fetch",
            RollbackStep::Reset => "reset",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackState {
    Idle,
    Preparing,
    Reverting,
    Done,
    Failed,
}

impl std::fmt::Display for RollbackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RollbackState::Idle => "idle",
            RollbackState::Preparing => "preparing",
            RollbackState::Reverting => "reverting",
            RollbackState::Done => "done",
            RollbackState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOptions {
    pub create_backup: bool,
    pub stash_uncommitted: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            stash_uncommitted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: RollbackState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub source_branch: Option<String>,
    pub source_head: Option<String>,
    pub target_ref: String,
    pub resolved_commit: Option<String>,
    pub backup_branch: Option<String>,
    pub stashed: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RollbackState,
    pub transitions: Vec<Transition>,
}

impl RollbackRecord {
    fn new(target_ref: &str) -> Self {
        let now = Utc::now();
        Self {
            source_branch: None,
            source_head: None,
            target_ref: target_ref.to_string(),
            resolved_commit: None,
            backup_branch: None,
            stashed: false,
            started_at: now,
            completed_at: None,
            status: RollbackState::Idle,
            transitions: vec![Transition {
                state: RollbackState::Idle,
                at: now,
            }],
        }
    }

    fn transition(&mut self, state: RollbackState) {
        self.status = state;
        self.transitions.push(Transition {
            state,
            at: Utc::now(),
        });
    }
}

/// Split a remote-qualified ref into remote and local branch name
///
/// `refs/remotes/<r>/<b>` and `remotes/<r>/<b>` are always remote refs;
/// `<r>/<b>` only when `<r>` is a configured remote.
pub fn strip_remote_prefix<'a>(target: &'a str, remotes: &[String]) -> (Option<&'a str>, &'a str) {
    for prefix in ["refs/remotes/", "remotes/"] {
        if let Some(rest) = target.strip_prefix(prefix) {
            if let Some((remote, branch)) = rest.split_once('/') {
                return (Some(remote), branch);
            }
        }
    }

    if let Some((remote, branch)) = target.split_once('/') {
        if !branch.is_empty() && remotes.iter().any(|r| r == remote) {
            return (Some(remote), branch);
        }
    }

    (None, target)
}

type StepResult<T> = std::result::Result<T, (RollbackStep, Error)>;

fn at(step: RollbackStep) -> impl FnOnce(Error) -> (RollbackStep, Error) {
    move |e| (step, e)
}

#[derive(Debug, Clone, Copy)]
pub struct RollbackEngine {
    priority: Priority,
}

impl Default for RollbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RollbackEngine {
    pub fn new() -> Self {
        Self {
            priority: Priority::High,
        }
    }

    pub async fn rollback(
        &self,
        handle: &ProjectHandle,
        target_ref: &str,
        options: RollbackOptions,
    ) -> Result<RollbackRecord> {
        let _guard = handle.lock().await;
        let mut record = RollbackRecord::new(target_ref);

        record.transition(RollbackState::Preparing);
        let prepared = self.prepare(handle, &mut record, options).await;

        let result = match prepared {
            Ok(()) => {
                record.transition(RollbackState::Reverting);
                self.revert(handle, &mut record).await
            }
            Err(e) => Err(e),
        };

        if let Err((step, e)) = result {
            record.transition(RollbackState::Failed);
            let stash_kept = record.stashed && !self.restore_stash(handle).await;
            tracing::warn!(
                project = %handle.id(),
                target = target_ref,
                %step,
                backup = record.backup_branch.as_deref().unwrap_or(""),
                stash_kept,
                error = %e,
                "Rollback failed"
            );
            return Err(Error::RollbackFailed {
                step,
                backup_branch: record.backup_branch,
                stash_kept,
                message: e.to_string(),
            });
        }

        record.transition(RollbackState::Done);
        record.completed_at = Some(Utc::now());
        handle.set_diverged(true);

        tracing::info!(
            project = %handle.id(),
            target = target_ref,
            commit = record.resolved_commit.as_deref().unwrap_or(""),
            backup = record.backup_branch.as_deref().unwrap_or(""),
            stashed = record.stashed,
            "Rollback complete"
        );
        Ok(record)
    }

    async fn prepare(
        &self,
        handle: &ProjectHandle,
        record: &mut RollbackRecord,
        options: RollbackOptions,
    ) -> StepResult<()> {
        record.source_branch = handle
            .run_once(command::current_branch(), self.priority)
            .await
            .ok()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());

        // An unborn HEAD has nothing to back up
        record.source_head = match handle.run_once(command::rev_parse_head(), self.priority).await {
            Ok(head) => Some(head.trim().to_string()).filter(|h| !h.is_empty()),
            Err(Error::CommandFailed { .. }) => None,
            Err(e) => return Err((RollbackStep::ReadHead, e)),
        };

        if options.stash_uncommitted {
            let status = handle
                .run(command::status_porcelain(), self.priority)
                .await
                .map_err(at(RollbackStep::Stash))?;
            if !parse_porcelain_z(&status).is_empty() {
                let message = format!("waypoint: before rollback to {}", record.target_ref);
                let cmd = command::stash_push(&message).map_err(at(RollbackStep::Stash))?;
                handle
                    .run_once(cmd, self.priority)
                    .await
                    .map_err(at(RollbackStep::Stash))?;
                record.stashed = true;
            }
        }

        if options.create_backup {
            if let Some(head) = record.source_head.clone() {
                let name = self
                    .backup_name(handle, record.source_branch.as_deref())
                    .await
                    .map_err(at(RollbackStep::Backup))?;
                let cmd = command::create_branch_at(&name, &head).map_err(at(RollbackStep::Backup))?;
                handle
                    .run_once(cmd, self.priority)
                    .await
                    .map_err(at(RollbackStep::Backup))?;
                tracing::info!(project = %handle.id(), backup = %name, head = %head, "Created backup branch");
                record.backup_branch = Some(name);
            }
        }

        Ok(())
    }

    /// Put back the changes stashed by this rollback; false if they stay stashed
    async fn restore_stash(&self, handle: &ProjectHandle) -> bool {
        match handle.run_once(command::stash_pop(), self.priority).await {
            Ok(_) => {
                tracing::info!(project = %handle.id(), "Restored stashed changes");
                true
            }
            Err(e) => {
                tracing::warn!(project = %handle.id(), error = %e, "Stashed changes could not be restored");
                false
            }
        }
    }

    /// `backup/<source>-<timestamp>`, suffixed when taken
    async fn backup_name(&self, handle: &ProjectHandle, source: Option<&str>) -> Result<String> {
        let existing = handle.run(command::list_branches(), self.priority).await?;
        let existing = non_empty_lines(&existing);

        let base = format!(
            "backup/{}-{}",
            source.unwrap_or("detached"),
            Utc::now().format("%Y%m%dT%H%M%SZ")
        );
        let mut name = base.clone();
        let mut suffix = 2;
        while existing.contains(&name) {
            name = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        Ok(name)
    }

    async fn revert(&self, handle: &ProjectHandle, record: &mut RollbackRecord) -> StepResult<()> {
        let remotes = handle
            .run(command::list_remotes(), self.priority)
            .await
            .map(|out| non_empty_lines(&out))
            .unwrap_or_default();

        let target = record.target_ref.clone();
        let (remote, local) = strip_remote_prefix(&target, &remotes);

        let commit = match self.resolve(handle, local).await {
            Ok(commit) => commit,
            Err(resolve_error) => {
                let remote = match remote {
                    Some(r) => r.to_string(),
                    None => {
                        let configured = handle.settings().remote_name;
                        if !remotes.contains(&configured) {
                            return Err((RollbackStep::Resolve, resolve_error));
                        }
                        configured
                    }
                };
                self.track_from_remote(handle, &remote, local).await?;
                self.resolve(handle, local)
                    .await
                    .map_err(at(RollbackStep::Resolve))?
            }
        };
        record.resolved_commit = Some(commit.clone());

        let cmd = command::reset_hard(&commit).map_err(at(RollbackStep::Reset))?;
        handle
            .run_once(cmd, self.priority)
            .await
            .map_err(at(RollbackStep::Reset))?;
        Ok(())
    }

    async fn resolve(&self, handle: &ProjectHandle, reference: &str) -> Result<String> {
        let out = handle
            .run_once(command::resolve_commit(reference)?, self.priority)
            .await?;
        let commit = out.trim().to_string();
        if commit.is_empty() {
            return Err(Error::Git(format!("'{}' does not name a commit", reference)));
        }
        Ok(commit)
    }

    /// Fetch `branch` from `remote` and create a local tracking branch
    async fn track_from_remote(&self, handle: &ProjectHandle, remote: &str, branch: &str) -> StepResult<()> {
        tracing::info!(project = %handle.id(), remote, branch, "Target not found locally; fetching");
        let fetch = command::fetch(remote, branch).map_err(at(RollbackStep::Fetch))?;
        handle
            .run(fetch, self.priority)
            .await
            .map_err(at(RollbackStep::Fetch))?;

        let track = command::track_remote_branch(branch, remote).map_err(at(RollbackStep::Fetch))?;
        handle
            .run_once(track, self.priority)
            .await
            .map_err(at(RollbackStep::Fetch))?;
        Ok(())
    }
}
