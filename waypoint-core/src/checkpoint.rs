//! Checkpoint engine
//!
//! A checkpoint moves the pending working tree changes onto a fresh branch
//! with one commit:
//!
//! 1. detect changes and apply the threshold gate
//! 2. take the project lock, detect again and re-apply the gate
//! 3. name the branch, `git checkout -b`, `git add -A`, commit
//! 4. read back the new HEAD
//!
//! Re-detecting under the lock makes duplicate triggers harmless: the
//! second one finds a clean tree and is skipped. A failure after the
//! branch was created puts the previous branch back and deletes the new one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CommitIdentity;
use crate::detect::{ChangeDetector, ChangeSnapshot};
use crate::git::command;
use crate::message::{message_or_template, CommitMessageGenerator};
use crate::naming::{BranchNamer, BranchType};
use crate::project::ProjectHandle;
use crate::store::{best_effort, MetadataStore};
use crate::throttle::Priority;
use crate::{Error, Result};

/// Entries of each kind kept in a [`HistorySnapshot`]
pub const HISTORY_LIMIT: usize = 50;

/// What asked for a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    Timer,
    PostEdit,
    External,
    User,
}

impl Trigger {
    /// Throttler priority for every command of this checkpoint
    pub fn priority(&self) -> Priority {
        match self {
            Trigger::Timer => Priority::Low,
            Trigger::PostEdit | Trigger::External => Priority::Medium,
            Trigger::User => Priority::High,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Trigger::Timer => "timer",
            Trigger::PostEdit => "post-edit",
            Trigger::External => "external",
            Trigger::User => "user",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRequest {
    pub trigger: Trigger,
    /// Commit even below the threshold or with no changes at all
    pub force: bool,
    /// Continue a conversation chain instead of a timestamped branch
    pub conversation_id: Option<String>,
    /// Override the detector's suggested branch type
    pub branch_type: Option<BranchType>,
}

impl CheckpointRequest {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            force: false,
            conversation_id: None,
            branch_type: None,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_branch_type(mut self, branch_type: BranchType) -> Self {
        self.branch_type = Some(branch_type);
        self
    }
}

/// Why no checkpoint was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    BelowThreshold { files: usize, lines: u64 },
    NoChanges,
    ScanFailed { error: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::BelowThreshold { files, lines } => {
                write!(f, "{} files, {} lines < threshold", files, lines)
            }
            SkipReason::NoChanges => write!(f, "no changes"),
            SkipReason::ScanFailed { error } => write!(f, "scan failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub name: String,
    pub branch_type: BranchType,
    pub parent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub head_commit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    pub branch: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub files_changed: usize,
    pub is_auto_commit: bool,
}

/// A checkpoint that was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub branch: BranchRecord,
    pub commit: CommitRecord,
    /// Branch (or detached commit) checked out before the checkpoint
    pub previous: Option<String>,
    pub trigger: Trigger,
    pub lines_added: u64,
    pub lines_removed: u64,
}

impl CheckpointRecord {
    pub fn commit_hash(&self) -> &str {
        &self.commit.hash
    }

    pub fn branch_name(&self) -> &str {
        &self.branch.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum CheckpointOutcome {
    Created(CheckpointRecord),
    Skipped(SkipReason),
}

impl CheckpointOutcome {
    pub fn created(&self) -> Option<&CheckpointRecord> {
        match self {
            CheckpointOutcome::Created(record) => Some(record),
            CheckpointOutcome::Skipped(_) => None,
        }
    }
}

/// Recent branches and commits of a project, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub branches: Vec<BranchRecord>,
    pub commits: Vec<CommitRecord>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl HistorySnapshot {
    pub fn record(&mut self, branch: BranchRecord, commit: CommitRecord) {
        self.updated_at = Some(commit.timestamp);
        self.branches.insert(0, branch);
        self.commits.insert(0, commit);
        self.branches.truncate(HISTORY_LIMIT);
        self.commits.truncate(HISTORY_LIMIT);
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Apply the threshold gate to a snapshot
fn gate(snapshot: &ChangeSnapshot, force: bool) -> Option<SkipReason> {
    if let Some(error) = &snapshot.scan_error {
        return Some(SkipReason::ScanFailed {
            error: error.clone(),
        });
    }
    if force {
        return None;
    }
    if snapshot.is_empty() {
        return Some(SkipReason::NoChanges);
    }
    if !snapshot.should_create_branch {
        return Some(SkipReason::BelowThreshold {
            files: snapshot.file_count(),
            lines: snapshot.total_lines(),
        });
    }
    None
}

/// Takes checkpoints for any number of projects
#[derive(Clone)]
pub struct CheckpointEngine {
    detector: ChangeDetector,
    namer: BranchNamer,
    identity: Option<CommitIdentity>,
    messages: Option<Arc<dyn CommitMessageGenerator>>,
    message_timeout: Duration,
    store: Option<Arc<dyn MetadataStore>>,
}

impl std::fmt::Debug for CheckpointEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointEngine")
            .field("identity", &self.identity)
            .field("messages", &self.messages.as_ref().map(|m| m.name()))
            .field("message_timeout", &self.message_timeout)
            .field("store", &self.store.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl CheckpointEngine {
    pub fn new(identity: Option<CommitIdentity>) -> Self {
        Self {
            detector: ChangeDetector,
            namer: BranchNamer,
            identity,
            messages: None,
            message_timeout: Duration::from_secs(10),
            store: None,
        }
    }

    pub fn with_messages(mut self, generator: Arc<dyn CommitMessageGenerator>, timeout: Duration) -> Self {
        self.messages = Some(generator);
        self.message_timeout = timeout;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn checkpoint(
        &self,
        handle: &ProjectHandle,
        request: CheckpointRequest,
    ) -> Result<CheckpointOutcome> {
        let priority = request.trigger.priority();

        let snapshot = self.detector.detect(handle, priority).await;
        if let Some(reason) = gate(&snapshot, request.force) {
            tracing::debug!(project = %handle.id(), trigger = %request.trigger, %reason, "Checkpoint skipped");
            return Ok(CheckpointOutcome::Skipped(reason));
        }

        let identity = self.identity.as_ref().ok_or(Error::MissingIdentity)?;

        let _guard = handle.lock().await;

        // Another trigger may have committed while we waited for the lock
        let snapshot = self.detector.detect(handle, priority).await;
        if let Some(reason) = gate(&snapshot, request.force) {
            tracing::debug!(project = %handle.id(), trigger = %request.trigger, %reason, "Checkpoint skipped after re-check");
            return Ok(CheckpointOutcome::Skipped(reason));
        }

        let previous = self.current_position(handle, priority).await;
        let branch_type = request
            .branch_type
            .unwrap_or(snapshot.suggested_branch_type);
        let name = self
            .namer
            .name(
                handle,
                branch_type,
                Utc::now(),
                request.conversation_id.as_deref(),
                priority,
            )
            .await?;

        let start = name
            .parent
            .as_deref()
            .filter(|parent| previous.as_deref() != Some(*parent));
        handle
            .run_once(command::checkout_new_branch(&name.name, start)?, priority)
            .await?;

        let message = match self
            .stage_and_commit(handle, &snapshot, identity, priority)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(project = %handle.id(), branch = %name.name, error = %e, "Checkpoint failed, restoring");
                self.restore(handle, previous.as_deref(), &name.name, priority)
                    .await;
                return Err(e);
            }
        };

        // The commit exists from here on; its branch is never removed
        match self.read_head(handle, &name.name, priority).await {
            Ok(hash) => {
                let now = Utc::now();
                let branch = BranchRecord {
                    name: name.name.clone(),
                    branch_type: name.branch_type,
                    parent: name.parent.clone(),
                    created_at: now,
                    head_commit: hash.clone(),
                };
                let commit = CommitRecord {
                    hash,
                    branch: name.name.clone(),
                    message,
                    timestamp: now,
                    files_changed: snapshot.file_count(),
                    is_auto_commit: true,
                };
                tracing::info!(
                    project = %handle.id(),
                    branch = %branch.name,
                    commit = %commit.hash,
                    files = commit.files_changed,
                    trigger = %request.trigger,
                    "Checkpoint created"
                );

                let history = handle.update_history(|h| {
                    h.record(branch.clone(), commit.clone());
                    h.clone()
                });
                self.persist_history(handle, history);

                Ok(CheckpointOutcome::Created(CheckpointRecord {
                    branch,
                    commit,
                    previous,
                    trigger: request.trigger,
                    lines_added: snapshot.lines_added,
                    lines_removed: snapshot.lines_removed,
                }))
            }
            Err(e) => {
                tracing::warn!(project = %handle.id(), branch = %name.name, error = %e, "Committed but the new head could not be read");
                Err(Error::HeadUnresolved {
                    branch: name.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Stage everything and commit, returning the message used
    async fn stage_and_commit(
        &self,
        handle: &ProjectHandle,
        snapshot: &ChangeSnapshot,
        identity: &CommitIdentity,
        priority: Priority,
    ) -> Result<String> {
        handle.run_once(command::add_all(), priority).await?;

        let summary = handle
            .run(command::diff_cached_stat(), priority)
            .await
            .unwrap_or_default();
        let message = message_or_template(
            self.messages.as_deref(),
            handle.path(),
            &summary,
            snapshot.file_count(),
            self.message_timeout,
        )
        .await;

        let allow_empty = snapshot.is_empty();
        handle
            .run_once(command::commit(identity, &message, allow_empty)?, priority)
            .await?;
        Ok(message)
    }

    /// Hash of the new head, retried through the throttler
    async fn read_head(&self, handle: &ProjectHandle, branch: &str, priority: Priority) -> Result<String> {
        let hash = handle
            .run(command::rev_parse_head(), priority)
            .await?
            .trim()
            .to_string();
        if hash.is_empty() {
            return Err(Error::Git(format!("'{}' did not resolve after commit", branch)));
        }
        Ok(hash)
    }

    /// Current branch name, or the HEAD commit when detached
    async fn current_position(&self, handle: &ProjectHandle, priority: Priority) -> Option<String> {
        let branch = handle
            .run_once(command::current_branch(), priority)
            .await
            .ok()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());
        if branch.is_some() {
            return branch;
        }
        handle
            .run_once(command::rev_parse_head(), priority)
            .await
            .ok()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
    }

    /// Put the working tree back where it was, best effort
    async fn restore(
        &self,
        handle: &ProjectHandle,
        previous: Option<&str>,
        new_branch: &str,
        priority: Priority,
    ) {
        if let Err(e) = handle.run_once(command::unstage_all(), priority).await {
            tracing::warn!(project = %handle.id(), error = %e, "Restore: unstage failed");
        }

        let Some(previous) = previous else {
            tracing::warn!(project = %handle.id(), branch = %new_branch, "Restore: no previous branch, leaving new branch in place");
            return;
        };

        match command::checkout(previous) {
            Ok(cmd) => {
                if let Err(e) = handle.run_once(cmd, priority).await {
                    tracing::warn!(project = %handle.id(), previous, error = %e, "Restore: checkout failed");
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(project = %handle.id(), previous, error = %e, "Restore: checkout failed");
                return;
            }
        }

        match command::delete_branch(new_branch) {
            Ok(cmd) => {
                if let Err(e) = handle.run_once(cmd, priority).await {
                    tracing::warn!(project = %handle.id(), branch = %new_branch, error = %e, "Restore: branch delete failed");
                }
            }
            Err(e) => {
                tracing::warn!(project = %handle.id(), branch = %new_branch, error = %e, "Restore: branch delete failed");
            }
        }
    }

    fn persist_history(&self, handle: &ProjectHandle, history: HistorySnapshot) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let id = handle.id().clone();
        tokio::spawn(async move {
            best_effort(store.name(), "save_history", store.save_history(&id, &history)).await;
        });
    }
}
