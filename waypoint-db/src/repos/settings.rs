//! Per-project settings documents

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::schema::SettingsRow;

/// Repository for project settings
pub struct SettingsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the settings of a project
    pub async fn upsert(&self, project_id: &str, settings_json: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_settings (project_id, settings_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (project_id) DO UPDATE SET
                settings_json = excluded.settings_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(settings_json)
        .bind(Utc::now())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, project_id: &str) -> Result<Option<SettingsRow>> {
        sqlx::query_as::<_, SettingsRow>("SELECT * FROM project_settings WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(self.pool)
            .await
            .map_err(Into::into)
    }

    /// List every project with stored settings
    pub async fn list(&self) -> Result<Vec<SettingsRow>> {
        sqlx::query_as::<_, SettingsRow>("SELECT * FROM project_settings ORDER BY project_id")
            .fetch_all(self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn delete(&self, project_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM project_settings WHERE project_id = ?")
            .bind(project_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
