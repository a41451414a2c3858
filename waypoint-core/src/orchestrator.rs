//! Entry points used by hosts
//!
//! The [`Orchestrator`] owns the per-project registry and the three engines.
//! Every checkpoint, push and rollback that goes through it produces one
//! [`OperationEvent`], which is broadcast and recorded in the metadata store.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use crate::checkpoint::{CheckpointEngine, CheckpointOutcome, CheckpointRequest, Trigger};
use crate::config::Config;
use crate::events::{EventBus, EventStatus, Operation, OperationEvent};
use crate::gateway::CommandGateway;
use crate::git;
use crate::message::CommandMessageGenerator;
use crate::project::{Project, ProjectHandle, ProjectRegistry, ProjectSettings};
use crate::push::{PushArbitrator, SyncResult, SyncStatus};
use crate::rollback::{RollbackEngine, RollbackOptions, RollbackRecord};
use crate::store::{best_effort, MetadataStore};
use crate::Result;

/// Result of an auto-commit followed by a push of the new head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub checkpoint: CheckpointOutcome,
    /// `None` when no checkpoint was created
    pub sync: Option<SyncResult>,
}

pub struct Orchestrator {
    config: Config,
    registry: ProjectRegistry,
    checkpoints: CheckpointEngine,
    pushes: PushArbitrator,
    rollbacks: RollbackEngine,
    store: Arc<dyn MetadataStore>,
    events: EventBus,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("projects", &self.registry.ids())
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(config: Config, gateway: Arc<dyn CommandGateway>, store: Arc<dyn MetadataStore>) -> Self {
        let mut checkpoints = CheckpointEngine::new(config.identity.clone()).with_store(store.clone());
        if let Some(command) = &config.message.command {
            checkpoints = checkpoints.with_messages(
                Arc::new(CommandMessageGenerator::new(command.clone())),
                config.message.timeout,
            );
        }

        Self {
            registry: ProjectRegistry::new(gateway, config.throttle.clone()),
            checkpoints,
            pushes: PushArbitrator::new(),
            rollbacks: RollbackEngine::new(),
            store,
            events: EventBus::default(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    /// Register the repository containing `path`
    pub async fn open_project(&self, path: impl AsRef<Path>) -> Result<Arc<ProjectHandle>> {
        let project = Project::open(path)?;
        self.register(project).await
    }

    /// Handle for `project`, restoring stored settings and history on first use
    pub async fn register(&self, project: Project) -> Result<Arc<ProjectHandle>> {
        if let Some(handle) = self.registry.get(&project.id) {
            return Ok(handle);
        }

        let store = self.store.name();
        let settings = best_effort(store, "load_settings", self.store.load_settings(&project.id))
            .await
            .flatten()
            .unwrap_or_else(|| self.config.project.clone());
        settings.validate()?;

        let history = best_effort(store, "load_history", self.store.load_history(&project.id))
            .await
            .flatten();

        let handle = self.registry.get_or_register(project, settings);
        if let Some(history) = history {
            if handle.history().is_empty() {
                handle.restore_history(history);
            }
        }
        Ok(handle)
    }

    /// Register `path`, creating a repository there first when needed
    ///
    /// Takes a forced checkpoint when the project has
    /// `auto_checkpoint_on_init` set.
    pub async fn init_project(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<(Arc<ProjectHandle>, Option<CheckpointOutcome>)> {
        let path = path.as_ref();
        if !git::is_git_repo(path) {
            let info = git::init(path, "main")?;
            tracing::info!(path = %info.root.display(), branch = %info.default_branch, "Initialised repository");
        }

        let handle = self.open_project(path).await?;
        if !handle.settings().auto_checkpoint_on_init {
            return Ok((handle, None));
        }

        let outcome = self
            .checkpoint(&handle, CheckpointRequest::new(Trigger::External).forced())
            .await?;
        Ok((handle, Some(outcome)))
    }

    /// Replace a project's settings and persist them
    pub async fn update_settings(&self, handle: &ProjectHandle, settings: ProjectSettings) -> Result<()> {
        settings.validate()?;
        handle.set_settings(settings.clone());
        best_effort(
            self.store.name(),
            "save_settings",
            self.store.save_settings(handle.id(), &settings),
        )
        .await;
        Ok(())
    }

    pub async fn checkpoint(
        &self,
        handle: &ProjectHandle,
        request: CheckpointRequest,
    ) -> Result<CheckpointOutcome> {
        let started = Instant::now();
        let result = self.checkpoints.checkpoint(handle, request).await;

        let event = match &result {
            Ok(CheckpointOutcome::Created(record)) => {
                OperationEvent::new(Operation::Checkpoint, handle.id().clone(), EventStatus::Succeeded)
                    .with_branch(record.branch_name())
                    .with_commit(record.commit_hash())
            }
            Ok(CheckpointOutcome::Skipped(reason)) => {
                OperationEvent::new(Operation::Checkpoint, handle.id().clone(), EventStatus::Skipped)
                    .with_detail(reason.to_string())
            }
            Err(e) => OperationEvent::new(Operation::Checkpoint, handle.id().clone(), EventStatus::Failed)
                .with_detail(e.to_string()),
        };
        self.publish(event.with_duration(started.elapsed())).await;

        result
    }

    pub async fn push(&self, handle: &Arc<ProjectHandle>, branch: &str, expected_head: &str) -> SyncResult {
        let started = Instant::now();
        let result = self.pushes.push(handle, branch, expected_head).await;

        let status = match result.status() {
            SyncStatus::Succeeded => EventStatus::Succeeded,
            SyncStatus::Skipped => EventStatus::Skipped,
            SyncStatus::Pending | SyncStatus::Running | SyncStatus::Failed => EventStatus::Failed,
        };
        let mut event = OperationEvent::new(Operation::Push, handle.id().clone(), status)
            .with_branch(branch)
            .with_commit(expected_head);
        if status != EventStatus::Succeeded {
            event = event.with_detail(result.outcome.to_string());
        }
        self.publish(event.with_duration(started.elapsed())).await;

        result
    }

    pub async fn rollback(
        &self,
        handle: &ProjectHandle,
        target_ref: &str,
        options: RollbackOptions,
    ) -> Result<RollbackRecord> {
        let started = Instant::now();
        let result = self.rollbacks.rollback(handle, target_ref, options).await;

        let event = match &result {
            Ok(record) => {
                let mut event =
                    OperationEvent::new(Operation::Rollback, handle.id().clone(), EventStatus::Succeeded);
                if let Some(branch) = &record.source_branch {
                    event = event.with_branch(branch.clone());
                }
                if let Some(commit) = &record.resolved_commit {
                    event = event.with_commit(commit.clone());
                }
                if let Some(backup) = &record.backup_branch {
                    event = event.with_detail(format!("backup at {}", backup));
                }
                event
            }
            Err(e) => OperationEvent::new(Operation::Rollback, handle.id().clone(), EventStatus::Failed)
                .with_detail(e.to_string()),
        };
        self.publish(event.with_duration(started.elapsed())).await;

        result
    }

    /// Checkpoint, then push the new head if one was created
    pub async fn checkpoint_and_push(
        &self,
        handle: &Arc<ProjectHandle>,
        request: CheckpointRequest,
    ) -> Result<CycleOutcome> {
        let checkpoint = self.checkpoint(handle, request).await?;
        let sync = match checkpoint.created() {
            Some(record) => Some(
                self.push(handle, record.branch_name(), record.commit_hash())
                    .await,
            ),
            None => None,
        };
        Ok(CycleOutcome { checkpoint, sync })
    }

    async fn publish(&self, event: OperationEvent) {
        best_effort(self.store.name(), "record_event", self.store.record_event(&event)).await;
        self.events.emit(event);
    }
}

/// Periodic timer trigger for one project
pub struct AutoCheckpointer {
    orchestrator: Arc<Orchestrator>,
    handle: Arc<ProjectHandle>,
    interval: Duration,
    push: bool,
}

impl AutoCheckpointer {
    /// Timer using the `[watch]` section of the orchestrator's config
    pub fn new(orchestrator: Arc<Orchestrator>, handle: Arc<ProjectHandle>) -> Self {
        let watch = orchestrator.config().watch.clone();
        Self {
            orchestrator,
            handle,
            interval: watch.interval,
            push: watch.push,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    /// One timer-triggered attempt
    pub async fn tick(&self) -> Result<CycleOutcome> {
        let request = CheckpointRequest::new(Trigger::Timer);
        if self.push {
            self.orchestrator
                .checkpoint_and_push(&self.handle, request)
                .await
        } else {
            let checkpoint = self.orchestrator.checkpoint(&self.handle, request).await?;
            Ok(CycleOutcome {
                checkpoint,
                sync: None,
            })
        }
    }

    /// Tick every interval until `shutdown` becomes true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.interval.max(Duration::from_secs(1));
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(project = %self.handle.id(), interval = ?period, push = self.push, "Auto-checkpoint started");
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.tick().await {
                        Ok(cycle) => tracing::debug!(
                            project = %self.handle.id(),
                            created = cycle.checkpoint.created().is_some(),
                            "Auto-checkpoint tick"
                        ),
                        Err(e) => tracing::warn!(project = %self.handle.id(), error = %e, "Auto-checkpoint failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(project = %self.handle.id(), "Auto-checkpoint stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::SkipReason;
    use crate::push::SyncOutcome;
    use crate::store::MemoryStore;
    use crate::testing::{fast_throttle, identity, project, ScriptedGateway};

    const HEAD: &str = "0123456789abcdef0123456789abcdef01234567";

    fn config() -> Config {
        Config {
            throttle: fast_throttle(),
            identity: Some(identity()),
            ..Config::default()
        }
    }

    fn repo_with_changes(gateway: &ScriptedGateway) {
        gateway.ok("git symbolic-ref", "main\n");
        gateway.ok("git branch --list", "main\n");
        gateway.ok("git rev-parse HEAD", &format!("{}\n", HEAD));
        gateway.ok("git diff HEAD --numstat", "30\t5\tsrc/lib.rs\n10\t0\tsrc/main.rs\n");
        gateway.ok("git status", " M src/lib.rs\0 M src/main.rs\0");
    }

    async fn setup(
        settings: ProjectSettings,
    ) -> (Arc<Orchestrator>, Arc<ScriptedGateway>, Arc<MemoryStore>, Arc<ProjectHandle>) {
        let gateway = Arc::new(ScriptedGateway::new());
        let store = Arc::new(MemoryStore::new());
        let mut config = config();
        config.project = settings;
        let orchestrator = Arc::new(Orchestrator::new(config, gateway.clone(), store.clone()));
        let handle = orchestrator.register(project()).await.unwrap();
        (orchestrator, gateway, store, handle)
    }

    #[tokio::test]
    async fn test_checkpoint_emits_and_records_event() {
        let (orchestrator, gateway, store, handle) = setup(ProjectSettings::default()).await;
        repo_with_changes(&gateway);
        let mut rx = orchestrator.subscribe();

        let outcome = orchestrator
            .checkpoint(&handle, CheckpointRequest::new(Trigger::User))
            .await
            .unwrap();
        let record = outcome.created().unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.operation, Operation::Checkpoint);
        assert_eq!(event.status, EventStatus::Succeeded);
        assert_eq!(event.branch.as_deref(), Some(record.branch_name()));
        assert_eq!(event.commit_hash.as_deref(), Some(HEAD));

        let stored = store.recent_events(handle.id(), 10).await.unwrap();
        assert_eq!(stored, vec![event]);
    }

    #[tokio::test]
    async fn test_skipped_checkpoint_event() {
        let (orchestrator, gateway, _store, handle) = setup(ProjectSettings::default()).await;
        gateway.ok("git status", " M README.md\0");
        gateway.ok("git diff HEAD --numstat", "3\t0\tREADME.md\n");
        let mut rx = orchestrator.subscribe();

        let outcome = orchestrator
            .checkpoint(&handle, CheckpointRequest::new(Trigger::PostEdit))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CheckpointOutcome::Skipped(SkipReason::BelowThreshold { files: 1, lines: 3 })
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, EventStatus::Skipped);
        assert_eq!(event.detail.as_deref(), Some("1 files, 3 lines < threshold"));
    }

    #[tokio::test]
    async fn test_checkpoint_and_push_pushes_new_head() {
        let settings = ProjectSettings {
            remote_enabled: true,
            ..ProjectSettings::default()
        };
        let (orchestrator, gateway, _store, handle) = setup(settings).await;
        repo_with_changes(&gateway);
        gateway.ok("git remote", "origin\n");
        gateway.ok("git diff-tree", "src/lib.rs\nsrc/main.rs\n");
        gateway.ok("refs/heads/", &format!("{}\n", HEAD));

        let cycle = orchestrator
            .checkpoint_and_push(&handle, CheckpointRequest::new(Trigger::Timer))
            .await
            .unwrap();

        let branch = cycle.checkpoint.created().unwrap().branch_name().to_string();
        let sync = cycle.sync.unwrap();
        assert_eq!(sync.branch, branch);
        assert_eq!(sync.expected_head, HEAD);
        assert!(matches!(sync.outcome, SyncOutcome::Pushed { .. }));
        assert_eq!(gateway.count("git push"), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_and_push_without_checkpoint() {
        let (orchestrator, gateway, _store, handle) = setup(ProjectSettings::default()).await;
        gateway.ok("git status", "");

        let cycle = orchestrator
            .checkpoint_and_push(&handle, CheckpointRequest::new(Trigger::Timer))
            .await
            .unwrap();
        assert!(cycle.checkpoint.created().is_none());
        assert!(cycle.sync.is_none());
        assert_eq!(gateway.count("git push"), 0);
    }

    #[tokio::test]
    async fn test_push_disabled_event() {
        let (orchestrator, _gateway, _store, handle) = setup(ProjectSettings::default()).await;
        let mut rx = orchestrator.subscribe();

        let result = orchestrator.push(&handle, "feature/x", HEAD).await;
        assert_eq!(result.status(), SyncStatus::Skipped);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.operation, Operation::Push);
        assert_eq!(event.status, EventStatus::Skipped);
        assert_eq!(event.detail.as_deref(), Some("skipped: remote disabled"));
    }

    #[tokio::test]
    async fn test_rollback_event_and_divergence() {
        let (orchestrator, gateway, _store, handle) = setup(ProjectSettings::default()).await;
        gateway.ok("git symbolic-ref", "main\n");
        gateway.ok("git rev-parse HEAD", &format!("{}\n", HEAD));
        gateway.ok("^{commit}", "fedcba9876543210fedcba9876543210fedcba98\n");
        let mut rx = orchestrator.subscribe();

        let record = orchestrator
            .rollback(&handle, "HEAD~1", RollbackOptions::default())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.operation, Operation::Rollback);
        assert_eq!(event.status, EventStatus::Succeeded);
        assert_eq!(event.branch.as_deref(), Some("main"));
        assert_eq!(
            event.detail,
            record.backup_branch.map(|b| format!("backup at {}", b))
        );
        assert!(handle.is_diverged());
    }

    #[tokio::test]
    async fn test_register_restores_stored_state() {
        let gateway = Arc::new(ScriptedGateway::new());
        let store = Arc::new(MemoryStore::new());
        let id = project().id;

        let settings = ProjectSettings {
            remote_enabled: true,
            sync_branch_patterns: vec!["conv-*".to_string()],
            ..ProjectSettings::default()
        };
        store.save_settings(&id, &settings).await.unwrap();

        let orchestrator = Orchestrator::new(config(), gateway, store);
        let handle = orchestrator.register(project()).await.unwrap();
        assert_eq!(handle.settings(), settings);

        let again = orchestrator.register(project()).await.unwrap();
        assert!(Arc::ptr_eq(&handle, &again));
    }

    #[tokio::test]
    async fn test_update_settings_rejects_invalid_patterns() {
        let (orchestrator, _gateway, store, handle) = setup(ProjectSettings::default()).await;

        let bad = ProjectSettings {
            sync_branch_patterns: vec!["feature/[".to_string()],
            ..ProjectSettings::default()
        };
        assert!(orchestrator.update_settings(&handle, bad).await.is_err());

        let good = ProjectSettings {
            remote_enabled: true,
            ..ProjectSettings::default()
        };
        orchestrator.update_settings(&handle, good.clone()).await.unwrap();
        assert_eq!(handle.settings(), good);
        assert_eq!(store.load_settings(handle.id()).await.unwrap(), Some(good));
    }

    #[tokio::test]
    async fn test_init_project_creates_repository() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fresh");
        let orchestrator = Orchestrator::new(
            config(),
            Arc::new(ScriptedGateway::new()),
            Arc::new(MemoryStore::new()),
        );

        let (handle, initial) = orchestrator.init_project(&path).await.unwrap();
        assert!(git::is_git_repo(&path));
        assert!(initial.is_none());
        assert_eq!(handle.project().default_branch, "main");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_checkpointer_ticks_until_shutdown() {
        let (orchestrator, gateway, _store, handle) = setup(ProjectSettings::default()).await;
        repo_with_changes(&gateway);

        let timer = AutoCheckpointer::new(orchestrator, handle)
            .with_interval(Duration::from_secs(60))
            .with_push(false);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(timer.run(rx));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gateway.count("git checkout -q -b"), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(gateway.count("git checkout -q -b"), 1);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
