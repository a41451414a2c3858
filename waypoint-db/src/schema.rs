//! Database schema and row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{Error, Result};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS project_settings (
        project_id TEXT PRIMARY KEY NOT NULL,
        settings_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS history_snapshots (
        project_id TEXT PRIMARY KEY NOT NULL,
        snapshot_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS operation_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        status TEXT NOT NULL,
        branch TEXT,
        commit_hash TEXT,
        detail TEXT,
        duration_ms INTEGER,
        timestamp TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_operation_events_project ON operation_events (project_id, timestamp)",
];

/// Create every table that does not exist yet
pub async fn create(pool: &SqlitePool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| Error::Schema(e.to_string()))?;
    }
    Ok(())
}

/// Project settings stored as a JSON document
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SettingsRow {
    pub project_id: String,
    pub settings_json: String,
    pub updated_at: DateTime<Utc>,
}

/// Latest history snapshot of a project
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SnapshotRow {
    pub project_id: String,
    pub snapshot_json: String,
    pub updated_at: DateTime<Utc>,
}

/// Completed checkpoint, push or rollback
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub project_id: String,
    pub operation: String,
    pub status: String,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub detail: Option<String>,
    pub duration_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Event to be inserted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub project_id: String,
    pub operation: String,
    pub status: String,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub detail: Option<String>,
    pub duration_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
}
