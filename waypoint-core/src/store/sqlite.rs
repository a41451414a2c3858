//! SQLite-backed metadata store

use async_trait::async_trait;
use waypoint_db::{Database, EventRow, NewEvent};

use super::{MetadataStore, EVENT_RETENTION};
use crate::checkpoint::HistorySnapshot;
use crate::events::OperationEvent;
use crate::project::{ProjectId, ProjectSettings};
use crate::{Error, Result};

impl From<waypoint_db::Error> for Error {
    fn from(e: waypoint_db::Error) -> Self {
        Error::Store(e.to_string())
    }
}

/// Metadata store persisted in a `waypoint-db` database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
    event_limit: usize,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            event_limit: EVENT_RETENTION,
        }
    }

    pub fn with_event_limit(mut self, limit: usize) -> Self {
        self.event_limit = limit;
        self
    }

    /// Open the database at the default cache location
    pub async fn open_default() -> Result<Self> {
        Ok(Self::new(Database::default().await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn event_from_row(row: EventRow) -> Result<OperationEvent> {
    Ok(OperationEvent {
        operation: row.operation.parse()?,
        project_id: ProjectId::new(row.project_id),
        branch: row.branch,
        commit_hash: row.commit_hash,
        status: row.status.parse()?,
        detail: row.detail,
        duration_ms: row.duration_ms.unwrap_or(0).max(0) as u64,
        timestamp: row.timestamp,
    })
}

#[async_trait]
impl MetadataStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load_settings(&self, project: &ProjectId) -> Result<Option<ProjectSettings>> {
        let row = self.db.settings().get(project.as_str()).await?;
        row.map(|r| serde_json::from_str::<ProjectSettings>(&r.settings_json).map_err(Error::from))
            .transpose()
    }

    async fn save_settings(&self, project: &ProjectId, settings: &ProjectSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.db.settings().upsert(project.as_str(), &json).await?;
        Ok(())
    }

    async fn load_history(&self, project: &ProjectId) -> Result<Option<HistorySnapshot>> {
        let row = self.db.snapshots().get(project.as_str()).await?;
        row.map(|r| serde_json::from_str::<HistorySnapshot>(&r.snapshot_json).map_err(Error::from))
            .transpose()
    }

    async fn save_history(&self, project: &ProjectId, history: &HistorySnapshot) -> Result<()> {
        let json = serde_json::to_string(history)?;
        self.db.snapshots().save(project.as_str(), &json).await?;
        Ok(())
    }

    async fn record_event(&self, event: &OperationEvent) -> Result<()> {
        let row = NewEvent {
            project_id: event.project_id.to_string(),
            operation: event.operation.to_string(),
            status: event.status.to_string(),
            branch: event.branch.clone(),
            commit_hash: event.commit_hash.clone(),
            detail: event.detail.clone(),
            duration_ms: i64::try_from(event.duration_ms).ok(),
            timestamp: event.timestamp,
        };
        self.db.events().insert(&row).await?;
        let keep = i64::try_from(self.event_limit).unwrap_or(i64::MAX);
        self.db.events().prune(&row.project_id, keep).await?;
        Ok(())
    }

    async fn recent_events(&self, project: &ProjectId, limit: usize) -> Result<Vec<OperationEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db
            .events()
            .recent(project.as_str(), limit)
            .await?
            .into_iter()
            .map(event_from_row)
            .collect()
    }
}
