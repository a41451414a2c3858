//! Operation event log

use sqlx::SqlitePool;

use crate::error::Result;
use crate::schema::{EventRow, NewEvent};

/// Repository for checkpoint, push and rollback events
pub struct EventRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EventRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an event and return its row id
    pub async fn insert(&self, event: &NewEvent) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO operation_events (
                project_id, operation, status, branch, commit_hash,
                detail, duration_ms, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.project_id)
        .bind(&event.operation)
        .bind(&event.status)
        .bind(&event.branch)
        .bind(&event.commit_hash)
        .bind(&event.detail)
        .bind(event.duration_ms)
        .bind(event.timestamp)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent events of a project, newest first
    pub async fn recent(&self, project_id: &str, limit: i64) -> Result<Vec<EventRow>> {
        sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM operation_events
            WHERE project_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await
        .map_err(Into::into)
    }

    /// Count events of a project grouped by operation
    pub async fn count_by_operation(&self, project_id: &str) -> Result<Vec<(String, i64)>> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT operation, COUNT(*) FROM operation_events WHERE project_id = ? GROUP BY operation ORDER BY operation",
        )
        .bind(project_id)
        .fetch_all(self.pool)
        .await
        .map_err(Into::into)
    }

    /// Drop all but the newest `keep` events of a project
    pub async fn prune(&self, project_id: &str, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM operation_events
            WHERE project_id = ? AND id NOT IN (
                SELECT id FROM operation_events
                WHERE project_id = ?
                ORDER BY timestamp DESC, id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(project_id)
        .bind(project_id)
        .bind(keep)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::{Duration, Utc};

    fn event(project: &str, operation: &str, minutes_ago: i64) -> NewEvent {
        NewEvent {
            project_id: project.to_string(),
            operation: operation.to_string(),
            status: "succeeded".to_string(),
            branch: Some("feature/20260101T000000Z".to_string()),
            commit_hash: None,
            detail: None,
            duration_ms: Some(12),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_recent_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.events();

        repo.insert(&event("p", "checkpoint", 3)).await.unwrap();
        repo.insert(&event("p", "push", 2)).await.unwrap();
        repo.insert(&event("p", "rollback", 1)).await.unwrap();
        repo.insert(&event("other", "push", 0)).await.unwrap();

        let rows = repo.recent("p", 2).await.unwrap();
        let ops: Vec<_> = rows.iter().map(|r| r.operation.as_str()).collect();
        assert_eq!(ops, vec!["rollback", "push"]);
        assert_eq!(rows[0].duration_ms, Some(12));
    }

    #[tokio::test]
    async fn test_count_and_prune() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.events();

        for i in 0..5 {
            repo.insert(&event("p", "checkpoint", 10 - i)).await.unwrap();
        }
        repo.insert(&event("p", "push", 0)).await.unwrap();

        let counts = repo.count_by_operation("p").await.unwrap();
        assert_eq!(
            counts,
            vec![("checkpoint".to_string(), 5), ("push".to_string(), 1)]
        );

        let removed = repo.prune("p", 2).await.unwrap();
        assert_eq!(removed, 4);
        let rows = repo.recent("p", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].operation, "push");
    }
}
