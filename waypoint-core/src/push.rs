//! Push arbitration
//!
//! Every push of a project goes through the [`PushArbitrator`]. A push is a
//! sync job identified by `project|branch|expected_head`; concurrent
//! requests with the same key attach to the running job and all receive its
//! result, so the remote sees one write.
//!
//! Job steps:
//!
//! 1. provision the remote, under the project lock
//! 2. below-threshold guard on the files of `expected_head`
//! 3. staleness guard: the branch must still point at `expected_head`
//! 4. push, retrying with `--set-upstream` or, after a rollback, with
//!    `--force-with-lease`

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::gateway::{classify, FailureKind};
use crate::git::command;
use crate::git::status::non_empty_lines;
use crate::project::{ProjectHandle, ProjectId};
use crate::throttle::Priority;
use crate::{Error, Result};

/// Finished jobs kept for audit
pub const SYNC_HISTORY_LIMIT: usize = 50;

/// Minutes finished jobs are kept for audit
pub const SYNC_HISTORY_TTL_MINUTES: i64 = 10;

/// Shortest expected head accepted as an abbreviation
const MIN_ABBREV: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Succeeded => "succeeded",
            SyncStatus::Failed => "failed",
            SyncStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Why a push was not attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SyncSkip {
    RemoteDisabled,
    BranchNotSynced,
    BelowThreshold { files: usize, threshold: usize },
}

impl std::fmt::Display for SyncSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncSkip::RemoteDisabled => write!(f, "remote disabled"),
            SyncSkip::BranchNotSynced => write!(f, "branch not in sync patterns"),
            SyncSkip::BelowThreshold { files, threshold } => {
                write!(f, "{} files < threshold of {}", files, threshold)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SyncOutcome {
    Pushed { forced: bool, upstream_set: bool },
    Skipped(SyncSkip),
    /// The branch moved away from the expected head; nothing was pushed
    StaleHead { actual: String },
    /// The remote refused a non-fast-forward update
    Rejected { reason: String },
    /// No remote configured and no URL to add one
    NoRemote { remote: String },
    Failed { error: String },
}

impl SyncOutcome {
    pub fn status(&self) -> SyncStatus {
        match self {
            SyncOutcome::Pushed { .. } => SyncStatus::Succeeded,
            SyncOutcome::Skipped(_) => SyncStatus::Skipped,
            SyncOutcome::StaleHead { .. }
            | SyncOutcome::Rejected { .. }
            | SyncOutcome::NoRemote { .. }
            | SyncOutcome::Failed { .. } => SyncStatus::Failed,
        }
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Pushed { forced, upstream_set } => {
                write!(f, "pushed")?;
                if *forced {
                    write!(f, " (force-with-lease)")?;
                }
                if *upstream_set {
                    write!(f, " (upstream set)")?;
                }
                Ok(())
            }
            SyncOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            SyncOutcome::StaleHead { actual } => write!(f, "stale head: branch is at {}", actual),
            SyncOutcome::Rejected { reason } => write!(f, "rejected: {}", reason),
            SyncOutcome::NoRemote { remote } => {
                write!(f, "no remote '{}' and no remote_url configured", remote)
            }
            SyncOutcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Result handed to every caller of a sync job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// `None` when the request was gated before a job was created
    pub job_id: Option<u64>,
    pub project_id: ProjectId,
    pub branch: String,
    pub expected_head: String,
    pub outcome: SyncOutcome,
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    pub fn status(&self) -> SyncStatus {
        self.outcome.status()
    }

    /// Convert into an error for callers that treat anything but a push as failure
    pub fn into_result(self) -> Result<SyncResult> {
        match &self.outcome {
            SyncOutcome::StaleHead { actual } => Err(Error::StaleHead {
                branch: self.branch.clone(),
                expected: self.expected_head.clone(),
                actual: actual.clone(),
            }),
            SyncOutcome::Rejected { reason } => Err(Error::Rejected {
                branch: self.branch.clone(),
                reason: reason.clone(),
            }),
            SyncOutcome::NoRemote { .. } | SyncOutcome::Failed { .. } => {
                Err(Error::Other(self.outcome.to_string()))
            }
            SyncOutcome::Pushed { .. } | SyncOutcome::Skipped(_) => Ok(self),
        }
    }
}

/// One push attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: u64,
    pub project_id: ProjectId,
    pub branch: String,
    pub expected_head: String,
    pub dedupe_key: String,
    pub status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<SyncOutcome>,
}

pub fn dedupe_key(project: &ProjectId, branch: &str, expected_head: &str) -> String {
    format!("{}|{}|{}", project, branch, expected_head)
}

type ResultRx = watch::Receiver<Option<SyncResult>>;

enum Attach {
    Existing(ResultRx),
    /// Another job is active on the same branch with a different head
    Busy(ResultRx),
    New {
        job: SyncJob,
        tx: watch::Sender<Option<SyncResult>>,
        rx: ResultRx,
    },
}

#[derive(Default)]
struct JobTableState {
    next_id: u64,
    active: HashMap<String, (SyncJob, ResultRx)>,
    history: VecDeque<SyncJob>,
}

/// Pending/running sync jobs of a project and a short audit trail
#[derive(Default)]
pub struct SyncJobTable {
    state: Mutex<JobTableState>,
}

impl SyncJobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs that are pending or running
    pub fn active(&self) -> Vec<SyncJob> {
        let mut jobs: Vec<_> = self
            .state
            .lock()
            .active
            .values()
            .map(|(job, _)| job.clone())
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Recently finished jobs, newest first
    pub fn history(&self) -> Vec<SyncJob> {
        let mut state = self.state.lock();
        prune(&mut state.history, Utc::now());
        state.history.iter().cloned().collect()
    }

    fn attach_or_start(&self, project: &ProjectId, branch: &str, expected_head: &str) -> Attach {
        let key = dedupe_key(project, branch, expected_head);
        let mut state = self.state.lock();

        if let Some((job, rx)) = state.active.get(&key) {
            tracing::debug!(job = job.id, key = %key, "Attached to running sync job");
            return Attach::Existing(rx.clone());
        }

        if let Some((job, rx)) = state.active.values().find(|(job, _)| job.branch == branch) {
            tracing::debug!(job = job.id, branch, "Branch has an active sync job; waiting");
            return Attach::Busy(rx.clone());
        }

        state.next_id += 1;
        let job = SyncJob {
            id: state.next_id,
            project_id: project.clone(),
            branch: branch.to_string(),
            expected_head: expected_head.to_string(),
            dedupe_key: key.clone(),
            status: SyncStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            outcome: None,
        };
        let (tx, rx) = watch::channel(None);
        state.active.insert(key, (job.clone(), rx.clone()));
        Attach::New { job, tx, rx }
    }

    fn mark_running(&self, key: &str) {
        if let Some((job, _)) = self.state.lock().active.get_mut(key) {
            job.status = SyncStatus::Running;
        }
    }

    fn finish(&self, key: &str, result: &SyncResult) {
        let mut state = self.state.lock();
        if let Some((mut job, _)) = state.active.remove(key) {
            job.status = result.status();
            job.finished_at = Some(result.finished_at);
            job.outcome = Some(result.outcome.clone());
            state.history.push_front(job);
        }
        prune(&mut state.history, Utc::now());
    }
}

fn prune(history: &mut VecDeque<SyncJob>, now: DateTime<Utc>) {
    history.truncate(SYNC_HISTORY_LIMIT);
    while let Some(oldest) = history.back() {
        let finished = oldest.finished_at.unwrap_or(oldest.created_at);
        if now - finished > chrono::Duration::minutes(SYNC_HISTORY_TTL_MINUTES) {
            history.pop_back();
        } else {
            break;
        }
    }
}

fn head_matches(actual: &str, expected: &str) -> bool {
    if actual == expected {
        return true;
    }
    expected.len() >= MIN_ABBREV && actual.starts_with(expected)
}

/// Failure signal carried by a failed command's output
fn failure_kind(error: &Error) -> Option<(FailureKind, String)> {
    error
        .command_output()
        .and_then(classify)
        .map(|signal| (signal.kind, signal.line))
}

/// Single authority for pushes
#[derive(Debug, Clone, Copy)]
pub struct PushArbitrator {
    priority: Priority,
}

impl Default for PushArbitrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PushArbitrator {
    pub fn new() -> Self {
        Self {
            priority: Priority::Medium,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Push `branch` if it still points at `expected_head`
    pub async fn push(
        &self,
        handle: &Arc<ProjectHandle>,
        branch: &str,
        expected_head: &str,
    ) -> SyncResult {
        let settings = handle.settings();
        let gated = |outcome| SyncResult {
            job_id: None,
            project_id: handle.id().clone(),
            branch: branch.to_string(),
            expected_head: expected_head.to_string(),
            outcome,
            finished_at: Utc::now(),
        };

        if !settings.remote_enabled {
            return gated(SyncOutcome::Skipped(SyncSkip::RemoteDisabled));
        }
        if !settings.should_sync(branch) {
            return gated(SyncOutcome::Skipped(SyncSkip::BranchNotSynced));
        }

        // One active job per branch: a different head waits its turn
        let mut rx = loop {
            match handle
                .sync_jobs()
                .attach_or_start(handle.id(), branch, expected_head)
            {
                Attach::Existing(rx) => break rx,
                Attach::Busy(mut other) => {
                    if other.wait_for(|r| r.is_some()).await.is_err() {
                        return gated(SyncOutcome::Failed {
                            error: "active sync job ended without a result".to_string(),
                        });
                    }
                }
                Attach::New { job, tx, rx } => {
                    self.spawn_job(handle, job, tx);
                    break rx;
                }
            }
        };

        let finished = rx.wait_for(|r| r.is_some()).await.ok().and_then(|r| r.clone());
        finished.unwrap_or_else(|| {
            gated(SyncOutcome::Failed {
                error: "sync job ended without a result".to_string(),
            })
        })
    }

    fn spawn_job(&self, handle: &Arc<ProjectHandle>, job: SyncJob, tx: watch::Sender<Option<SyncResult>>) {
        let this = *self;
        let handle = Arc::clone(handle);
        tokio::spawn(async move {
            handle.sync_jobs().mark_running(&job.dedupe_key);
            let outcome = this
                .run_job(&handle, &job.branch, &job.expected_head)
                .await;
            let result = SyncResult {
                job_id: Some(job.id),
                project_id: job.project_id.clone(),
                branch: job.branch.clone(),
                expected_head: job.expected_head.clone(),
                outcome,
                finished_at: Utc::now(),
            };
            tracing::info!(
                project = %result.project_id,
                job = job.id,
                branch = %result.branch,
                status = %result.status(),
                outcome = %result.outcome,
                "Sync job finished"
            );
            handle.sync_jobs().finish(&job.dedupe_key, &result);
            let _ = tx.send(Some(result));
        });
    }

    async fn run_job(&self, handle: &ProjectHandle, branch: &str, expected_head: &str) -> SyncOutcome {
        match self.try_job(handle, branch, expected_head).await {
            Ok(outcome) => outcome,
            Err(e) => SyncOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    async fn try_job(&self, handle: &ProjectHandle, branch: &str, expected_head: &str) -> Result<SyncOutcome> {
        let settings = handle.settings();
        let remote = settings.remote_name.as_str();

        if let Some(outcome) = self.provision(handle, remote, settings.remote_url.as_deref()).await? {
            return Ok(outcome);
        }

        let files = handle
            .run(command::commit_files(expected_head)?, self.priority)
            .await?;
        let files = non_empty_lines(&files).len();
        if files < settings.min_changed_files_threshold {
            return Ok(SyncOutcome::Skipped(SyncSkip::BelowThreshold {
                files,
                threshold: settings.min_changed_files_threshold,
            }));
        }

        let actual = match handle
            .run_once(command::rev_parse_branch(branch)?, self.priority)
            .await
        {
            Ok(out) => out.trim().to_string(),
            Err(Error::CommandFailed { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        if !head_matches(&actual, expected_head) {
            tracing::warn!(
                project = %handle.id(),
                branch,
                expected = expected_head,
                actual = %actual,
                "Branch moved; not pushing"
            );
            return Ok(SyncOutcome::StaleHead { actual });
        }

        // Push the verified commit, not whatever the branch points at later
        self.push_branch(handle, remote, branch, &actual).await
    }

    /// Add the remote when it is missing; one provisioning step at a time
    async fn provision(
        &self,
        handle: &ProjectHandle,
        remote: &str,
        url: Option<&str>,
    ) -> Result<Option<SyncOutcome>> {
        let _guard = handle.lock().await;

        let remotes = handle.run(command::list_remotes(), self.priority).await?;
        if non_empty_lines(&remotes).iter().any(|r| r == remote) {
            return Ok(None);
        }

        let Some(url) = url else {
            return Ok(Some(SyncOutcome::NoRemote {
                remote: remote.to_string(),
            }));
        };

        handle
            .run_once(command::add_remote(remote, url)?, self.priority)
            .await?;
        tracing::info!(project = %handle.id(), remote, url, "Added remote");
        Ok(None)
    }

    async fn push_branch(
        &self,
        handle: &ProjectHandle,
        remote: &str,
        branch: &str,
        commit: &str,
    ) -> Result<SyncOutcome> {
        let mut upstream_set = false;
        let mut result = handle
            .run_once(command::push(remote, branch, commit)?, self.priority)
            .await;

        if let Err(e) = &result {
            if matches!(failure_kind(e), Some((FailureKind::NoUpstream, _))) {
                tracing::debug!(project = %handle.id(), branch, "No upstream; pushing with --set-upstream");
                upstream_set = true;
                result = handle
                    .run_once(command::push_set_upstream(remote, branch, commit)?, self.priority)
                    .await;
            }
        }

        let error = match result {
            Ok(_) => {
                return Ok(SyncOutcome::Pushed {
                    forced: false,
                    upstream_set,
                })
            }
            Err(e) => e,
        };

        match failure_kind(&error) {
            Some((FailureKind::NonFastForward, line)) => {
                if !handle.is_diverged() {
                    tracing::warn!(project = %handle.id(), branch, reason = %line, "Push rejected");
                    return Ok(SyncOutcome::Rejected { reason: line });
                }

                tracing::info!(project = %handle.id(), branch, "History was rewritten; pushing with lease");
                handle
                    .run_once(command::push_force_with_lease(remote, branch, commit)?, self.priority)
                    .await?;
                handle.set_diverged(false);
                Ok(SyncOutcome::Pushed {
                    forced: true,
                    upstream_set,
                })
            }
            _ => Ok(SyncOutcome::Failed {
                error: error.to_string(),
            }),
        }
    }
}
