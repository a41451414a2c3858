//! CLI command implementations

pub mod checkpoint;
pub mod config;
pub mod history;
pub mod init;
pub mod push;
pub mod rollback;
pub mod status;
pub mod watch;

pub use checkpoint::CheckpointArgs;
pub use history::HistoryArgs;
pub use init::InitArgs;
pub use push::PushArgs;
pub use rollback::RollbackArgs;
pub use status::StatusArgs;
pub use watch::WatchArgs;

use std::path::PathBuf;
use std::sync::Arc;

use waypoint_core::{
    Config, MemoryStore, MetadataStore, Orchestrator, ProjectHandle, ShellGateway, SqliteStore,
};
use waypoint_db::Database;

/// Global options shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub project: PathBuf,
    pub no_store: bool,
    pub verbose: bool,
}

impl Context {
    /// Build an orchestrator backed by the shell gateway and the metadata store
    pub async fn orchestrator(&self, config: Config) -> anyhow::Result<Arc<Orchestrator>> {
        let store: Arc<dyn MetadataStore> = if self.no_store {
            Arc::new(MemoryStore::new())
        } else {
            let db = Database::default()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
            Arc::new(SqliteStore::new(db))
        };

        Ok(Arc::new(Orchestrator::new(
            config,
            Arc::new(ShellGateway::new()),
            store,
        )))
    }

    /// Orchestrator plus the handle of the project directory
    pub async fn open(
        &self,
        config: Config,
    ) -> anyhow::Result<(Arc<Orchestrator>, Arc<ProjectHandle>)> {
        let orchestrator = self.orchestrator(config).await?;
        let handle = orchestrator.open_project(&self.project).await?;
        if self.verbose {
            tracing::info!(
                project = %handle.id(),
                path = %handle.path().display(),
                "Opened project"
            );
        }
        Ok((orchestrator, handle))
    }
}

/// Format a duration in seconds as a short human-readable string
pub fn format_duration(seconds: i64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86400 {
        let hours = seconds / 3600;
        let mins = (seconds % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        format!("{}d", seconds / 86400)
    }
}

/// First 10 characters of a commit hash
pub fn short(hash: &str) -> &str {
    hash.get(..10).unwrap_or(hash)
}
