//! Latest history snapshot per project

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::schema::SnapshotRow;

/// Repository for history snapshots
///
/// Only the most recent snapshot of a project is kept.
pub struct SnapshotRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SnapshotRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, project_id: &str, snapshot_json: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO history_snapshots (project_id, snapshot_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (project_id) DO UPDATE SET
                snapshot_json = excluded.snapshot_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(snapshot_json)
        .bind(Utc::now())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, project_id: &str) -> Result<Option<SnapshotRow>> {
        sqlx::query_as::<_, SnapshotRow>("SELECT * FROM history_snapshots WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(self.pool)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    #[tokio::test]
    async fn test_save_keeps_latest() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.snapshots();

        repo.save("p", r#"{"branches":[]}"#).await.unwrap();
        let first = repo.get("p").await.unwrap().unwrap();

        repo.save("p", r#"{"branches":[1]}"#).await.unwrap();
        let second = repo.get("p").await.unwrap().unwrap();

        assert_eq!(second.snapshot_json, r#"{"branches":[1]}"#);
        assert!(second.updated_at >= first.updated_at);
        assert!(repo.get("other").await.unwrap().is_none());
    }
}
