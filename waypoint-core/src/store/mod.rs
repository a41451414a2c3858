//! Persistent metadata store
//!
//! Holds per-project settings, the recent history snapshot and the
//! operation event log. The engines never depend on the store succeeding:
//! every call made on their behalf goes through [`best_effort`], which
//! bounds it with a short timeout and only logs failures.

#[cfg(feature = "database")]
mod sqlite;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::checkpoint::HistorySnapshot;
use crate::events::OperationEvent;
use crate::project::{ProjectId, ProjectSettings};
use crate::{Error, Result};

#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

/// Bound on a single store call made on behalf of an engine
pub const STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Events kept per project; older ones are dropped as new ones arrive
pub const EVENT_RETENTION: usize = 1000;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Get the name of this store
    fn name(&self) -> &'static str;

    async fn load_settings(&self, project: &ProjectId) -> Result<Option<ProjectSettings>>;

    async fn save_settings(&self, project: &ProjectId, settings: &ProjectSettings) -> Result<()>;

    async fn load_history(&self, project: &ProjectId) -> Result<Option<HistorySnapshot>>;

    async fn save_history(&self, project: &ProjectId, history: &HistorySnapshot) -> Result<()>;

    async fn record_event(&self, event: &OperationEvent) -> Result<()>;

    /// Most recent events of a project, newest first
    async fn recent_events(&self, project: &ProjectId, limit: usize) -> Result<Vec<OperationEvent>>;
}

/// Run a store call with [`STORE_TIMEOUT`], logging instead of failing
pub async fn best_effort<T>(
    store: &str,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Option<T> {
    match tokio::time::timeout(STORE_TIMEOUT, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(store, operation, error = %e, "Metadata store call failed");
            None
        }
        Err(_) => {
            tracing::warn!(store, operation, "Metadata store call timed out");
            None
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    settings: HashMap<ProjectId, ProjectSettings>,
    history: HashMap<ProjectId, String>,
    events: HashMap<ProjectId, VecDeque<OperationEvent>>,
}

/// Process-local store
///
/// History snapshots are kept as JSON so the store behaves like the
/// persistent one.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    event_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            event_limit: EVENT_RETENTION,
        }
    }

    pub fn with_event_limit(mut self, limit: usize) -> Self {
        self.event_limit = limit;
        self
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load_settings(&self, project: &ProjectId) -> Result<Option<ProjectSettings>> {
        Ok(self.state.lock().settings.get(project).cloned())
    }

    async fn save_settings(&self, project: &ProjectId, settings: &ProjectSettings) -> Result<()> {
        self.state
            .lock()
            .settings
            .insert(project.clone(), settings.clone());
        Ok(())
    }

    async fn load_history(&self, project: &ProjectId) -> Result<Option<HistorySnapshot>> {
        let json = self.state.lock().history.get(project).cloned();
        json.map(|j| serde_json::from_str::<HistorySnapshot>(&j).map_err(Error::from))
            .transpose()
    }

    async fn save_history(&self, project: &ProjectId, history: &HistorySnapshot) -> Result<()> {
        let json = serde_json::to_string(history)?;
        self.state.lock().history.insert(project.clone(), json);
        Ok(())
    }

    async fn record_event(&self, event: &OperationEvent) -> Result<()> {
        let mut state = self.state.lock();
        let events = state.events.entry(event.project_id.clone()).or_default();
        events.push_back(event.clone());
        while events.len() > self.event_limit {
            events.pop_front();
        }
        Ok(())
    }

    async fn recent_events(&self, project: &ProjectId, limit: usize) -> Result<Vec<OperationEvent>> {
        Ok(self
            .state
            .lock()
            .events
            .get(project)
            .map(|events| events.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{BranchRecord, CommitRecord};
    use crate::events::{EventStatus, Operation};
    use crate::naming::BranchType;
    use chrono::Utc;

    fn history() -> HistorySnapshot {
        let mut history = HistorySnapshot::default();
        let now = Utc::now();
        history.record(
            BranchRecord {
                name: "feature/20260101T000000Z".to_string(),
                branch_type: BranchType::Feature,
                parent: None,
                created_at: now,
                head_commit: "abc".to_string(),
            },
            CommitRecord {
                hash: "abc".to_string(),
                branch: "feature/20260101T000000Z".to_string(),
                message: "Auto-commit: 2 files changed".to_string(),
                timestamp: now,
                files_changed: 2,
                is_auto_commit: true,
            },
        );
        history
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let id = ProjectId::new("p");

        assert!(store.load_settings(&id).await.unwrap().is_none());
        let mut settings = ProjectSettings::default();
        settings.remote_enabled = true;
        store.save_settings(&id, &settings).await.unwrap();
        assert_eq!(store.load_settings(&id).await.unwrap(), Some(settings));

        store.save_history(&id, &history()).await.unwrap();
        let loaded = store.load_history(&id).await.unwrap().unwrap();
        assert_eq!(loaded.commits.len(), 1);
        assert_eq!(loaded.commits[0].hash, "abc");
    }

    #[tokio::test]
    async fn test_recent_events_newest_first() {
        let store = MemoryStore::new();
        let id = ProjectId::new("p");
        for op in [Operation::Checkpoint, Operation::Push, Operation::Rollback] {
            store
                .record_event(&OperationEvent::new(op, id.clone(), EventStatus::Succeeded))
                .await
                .unwrap();
        }
        store
            .record_event(&OperationEvent::new(
                Operation::Push,
                ProjectId::new("other"),
                EventStatus::Failed,
            ))
            .await
            .unwrap();

        let events = store.recent_events(&id, 2).await.unwrap();
        let ops: Vec<_> = events.iter().map(|e| e.operation).collect();
        assert_eq!(ops, vec![Operation::Rollback, Operation::Push]);
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let store = MemoryStore::new().with_event_limit(3);
        let id = ProjectId::new("p");
        for i in 0..5u64 {
            let event = OperationEvent::new(Operation::Checkpoint, id.clone(), EventStatus::Succeeded)
                .with_duration(Duration::from_millis(i));
            store.record_event(&event).await.unwrap();
        }

        let events = store.recent_events(&id, 10).await.unwrap();
        let durations: Vec<_> = events.iter().map(|e| e.duration_ms).collect();
        assert_eq!(durations, vec![4, 3, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_effort_times_out() {
        let result = best_effort("test", "slow", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        })
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_best_effort_swallows_errors() {
        let result: Option<()> = best_effort("test", "broken", async {
            Err(crate::Error::Store("disk full".to_string()))
        })
        .await;
        assert!(result.is_none());
    }
}
