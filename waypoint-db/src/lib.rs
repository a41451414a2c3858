//! Database layer for Waypoint
//!
//! Provides persistence for project settings, history snapshots and the
//! operation event log.

pub mod error;
pub mod repos;
pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use error::{Error, Result};
pub use repos::{EventRepository, SettingsRepository, SnapshotRepository};
pub use schema::{EventRow, NewEvent, SettingsRow, SnapshotRow};

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Create a new database connection from a file path
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Io(format!("Failed to create database directory: {}", e)))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        schema::create(&pool).await?;
        tracing::debug!(path = %db_path.display(), "Opened database");

        Ok(Self { pool })
    }

    /// Private in-memory database; lives as long as the pool
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection would get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        schema::create(&pool).await?;
        Ok(Self { pool })
    }

    /// Get the default database path (~/.cache/waypoint/waypoint.db)
    pub fn default_path() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| Error::Io("Could not determine cache directory".to_string()))?;
        Ok(cache_dir.join("waypoint").join("waypoint.db"))
    }

    /// Create a database connection at the default path
    pub async fn default() -> Result<Self> {
        Self::new(Self::default_path()?).await
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> SettingsRepository<'_> {
        SettingsRepository::new(&self.pool)
    }

    pub fn snapshots(&self) -> SnapshotRepository<'_> {
        SnapshotRepository::new(&self.pool)
    }

    pub fn events(&self) -> EventRepository<'_> {
        EventRepository::new(&self.pool)
    }
}
