//! Projects and their per-project runtime state
//!
//! A [`ProjectHandle`] bundles everything the engines share for one working
//! tree: the operation lock, the command throttler, the divergence flag, the
//! sync job table and the recent history. Handles live in a
//! [`ProjectRegistry`] and are created the first time a project is used.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::MutexGuard;

use crate::checkpoint::HistorySnapshot;
use crate::config::ThrottleConfig;
use crate::gateway::CommandGateway;
use crate::push::SyncJobTable;
use crate::throttle::{CommandThrottler, Priority, ThrottledCommand};
use crate::{git, Error, Result};

/// Stable identifier of a project
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from a working tree path
    ///
    /// The directory name keeps ids readable; the path hash keeps two
    /// checkouts with the same directory name apart.
    pub fn from_path(path: &Path) -> Self {
        let name: String = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();

        // FNV-1a, stable across runs and platforms
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in path.to_string_lossy().as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }

        Self(format!("{}-{:08x}", name, hash as u32))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A working tree under Waypoint's control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Working tree root
    pub path: PathBuf,
    /// Branch conversation step 1 is parented on
    pub default_branch: String,
}

impl Project {
    pub fn new(id: ProjectId, path: PathBuf, default_branch: impl Into<String>) -> Self {
        Self {
            id,
            path,
            default_branch: default_branch.into(),
        }
    }

    /// Open the repository containing `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let info = git::inspect(path)?;
        Ok(Self {
            id: ProjectId::from_path(&info.root),
            path: info.root,
            default_branch: info.default_branch,
        })
    }
}

/// Per-project behaviour settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// Changed files at which a checkpoint is worth taking
    pub min_changed_files_threshold: usize,

    /// Changed lines (added + removed) at which a checkpoint is worth taking
    pub min_changed_lines_threshold: u64,

    /// Glob patterns of branches that are pushed; empty means all
    pub sync_branch_patterns: Vec<String>,

    /// Whether pushes are performed at all
    pub remote_enabled: bool,

    /// URL used to add the remote when it is missing
    pub remote_url: Option<String>,

    /// Remote to push to
    pub remote_name: String,

    /// Take a checkpoint right after the project is initialised
    pub auto_checkpoint_on_init: bool,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            min_changed_files_threshold: 2,
            min_changed_lines_threshold: 50,
            sync_branch_patterns: Vec::new(),
            remote_enabled: false,
            remote_url: None,
            remote_name: "origin".to_string(),
            auto_checkpoint_on_init: false,
        }
    }
}

impl ProjectSettings {
    /// Whether `branch` is eligible for pushing
    ///
    /// Patterns that fail to parse never match.
    pub fn should_sync(&self, branch: &str) -> bool {
        if self.sync_branch_patterns.is_empty() {
            return true;
        }
        self.sync_branch_patterns.iter().any(|p| match glob::Pattern::new(p) {
            Ok(pattern) => pattern.matches(branch),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "Ignoring invalid sync branch pattern");
                false
            }
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote_name.trim().is_empty() {
            return Err(Error::Config("remote_name must not be empty".to_string()));
        }
        for p in &self.sync_branch_patterns {
            glob::Pattern::new(p).map_err(|e| {
                Error::Config(format!("Invalid sync branch pattern '{}': {}", p, e))
            })?;
        }
        if let Some(url) = &self.remote_url {
            validate_remote_url(url)?;
        }
        Ok(())
    }
}

/// Accept URLs git can push to
///
/// Supports:
/// - `https://host/owner/repo.git` and other `scheme://` forms
/// - `git@host:owner/repo.git`
/// - local paths
fn validate_remote_url(input: &str) -> Result<()> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Config("remote_url must not be empty".to_string()));
    }

    if input.contains("://") {
        let url = url::Url::parse(input)
            .map_err(|e| Error::Config(format!("Invalid remote URL '{}': {}", input, e)))?;
        if url.scheme() != "file" && url.host_str().is_none() {
            return Err(Error::Config(format!("Remote URL '{}' has no host", input)));
        }
        return Ok(());
    }

    if let Some((user_host, path)) = input.split_once(':') {
        if user_host.contains('@') && !path.is_empty() {
            return Ok(());
        }
    }

    if input.contains(char::is_whitespace) {
        return Err(Error::Config(format!("Invalid remote URL '{}'", input)));
    }
    Ok(())
}

/// Shared runtime state of one project
pub struct ProjectHandle {
    project: Project,
    settings: RwLock<ProjectSettings>,
    lock: tokio::sync::Mutex<()>,
    throttler: CommandThrottler,
    diverged: AtomicBool,
    sync_jobs: SyncJobTable,
    history: Mutex<HistorySnapshot>,
}

impl std::fmt::Debug for ProjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectHandle")
            .field("project", &self.project)
            .field("diverged", &self.is_diverged())
            .finish_non_exhaustive()
    }
}

impl ProjectHandle {
    pub fn new(
        project: Project,
        settings: ProjectSettings,
        gateway: Arc<dyn CommandGateway>,
        throttle: ThrottleConfig,
    ) -> Self {
        let throttler = CommandThrottler::new(project.path.clone(), gateway, throttle);
        Self {
            project,
            settings: RwLock::new(settings),
            lock: tokio::sync::Mutex::new(()),
            throttler,
            diverged: AtomicBool::new(false),
            sync_jobs: SyncJobTable::new(),
            history: Mutex::new(HistorySnapshot::default()),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn id(&self) -> &ProjectId {
        &self.project.id
    }

    pub fn path(&self) -> &Path {
        &self.project.path
    }

    pub fn settings(&self) -> ProjectSettings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: ProjectSettings) {
        *self.settings.write() = settings;
    }

    pub fn throttler(&self) -> &CommandThrottler {
        &self.throttler
    }

    pub fn sync_jobs(&self) -> &SyncJobTable {
        &self.sync_jobs
    }

    /// Acquire the per-project operation lock
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Whether local history was rewritten since the last successful push
    pub fn is_diverged(&self) -> bool {
        self.diverged.load(Ordering::SeqCst)
    }

    pub fn set_diverged(&self, diverged: bool) {
        self.diverged.store(diverged, Ordering::SeqCst);
    }

    pub fn history(&self) -> HistorySnapshot {
        self.history.lock().clone()
    }

    pub(crate) fn update_history<R>(&self, f: impl FnOnce(&mut HistorySnapshot) -> R) -> R {
        f(&mut self.history.lock())
    }

    pub(crate) fn restore_history(&self, snapshot: HistorySnapshot) {
        *self.history.lock() = snapshot;
    }

    /// Run a command through the throttler with default retries
    pub async fn run(&self, command: String, priority: Priority) -> Result<String> {
        self.throttler
            .submit(ThrottledCommand::new(command).with_priority(priority))
            .await
    }

    /// Run a command through the throttler without retries
    ///
    /// For commands whose failure output is inspected by the caller.
    pub async fn run_once(&self, command: String, priority: Priority) -> Result<String> {
        self.throttler
            .submit(
                ThrottledCommand::new(command)
                    .with_priority(priority)
                    .with_retries(0),
            )
            .await
    }
}

/// Per-project handles keyed by project id
pub struct ProjectRegistry {
    gateway: Arc<dyn CommandGateway>,
    throttle: ThrottleConfig,
    projects: Mutex<HashMap<ProjectId, Arc<ProjectHandle>>>,
}

impl ProjectRegistry {
    pub fn new(gateway: Arc<dyn CommandGateway>, throttle: ThrottleConfig) -> Self {
        Self {
            gateway,
            throttle,
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for `project`, created with `settings` on first use
    ///
    /// An existing handle keeps its own settings.
    pub fn get_or_register(&self, project: Project, settings: ProjectSettings) -> Arc<ProjectHandle> {
        let mut projects = self.projects.lock();
        projects
            .entry(project.id.clone())
            .or_insert_with(|| {
                tracing::info!(project = %project.id, path = %project.path.display(), "Registered project");
                Arc::new(ProjectHandle::new(
                    project,
                    settings,
                    self.gateway.clone(),
                    self.throttle.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, id: &ProjectId) -> Option<Arc<ProjectHandle>> {
        self.projects.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &ProjectId) -> Option<Arc<ProjectHandle>> {
        self.projects.lock().remove(id)
    }

    pub fn ids(&self) -> Vec<ProjectId> {
        let mut ids: Vec<_> = self.projects.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
