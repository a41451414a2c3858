//! History command - recent checkpoints and operations

use chrono::Utc;
use clap::Args;
use waypoint_core::Config;

use super::{format_duration, short, Context};

/// Show recent checkpoints and operations
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Number of entries to show
    #[arg(short = 'n', long, default_value_t = 20)]
    limit: usize,
}

impl HistoryArgs {
    pub async fn execute(&self, ctx: &Context, config: Config) -> anyhow::Result<()> {
        let (orchestrator, handle) = ctx.open(config).await?;
        let now = Utc::now();

        let history = handle.history();
        println!();
        if history.is_empty() {
            println!("No checkpoints recorded.");
        } else {
            println!("Checkpoints:");
            for commit in history.commits.iter().take(self.limit) {
                let ago = format_duration((now - commit.timestamp).num_seconds());
                println!(
                    "  {}  {:<40}  {} ago  {}",
                    short(&commit.hash),
                    commit.branch,
                    ago,
                    commit.message
                );
            }
        }

        let events = orchestrator
            .store()
            .recent_events(handle.id(), self.limit)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load events: {}", e))?;

        println!();
        if events.is_empty() {
            println!("No operations recorded.");
        } else {
            println!("Operations:");
            for event in events {
                let ago = format_duration((now - event.timestamp).num_seconds());
                println!(
                    "  {:<10} {:<9} {:<40} {} ago{}",
                    event.operation.to_string(),
                    event.status.to_string(),
                    event.branch.as_deref().unwrap_or("-"),
                    ago,
                    event
                        .detail
                        .as_deref()
                        .map(|d| format!("  ({})", d))
                        .unwrap_or_default()
                );
            }
        }

        Ok(())
    }
}
