//! Status command - pending changes and throttler state

use clap::Args;
use waypoint_core::{ChangeDetector, Config, Priority};

use super::Context;

/// Show pending changes and throttler state
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// List every changed file
    #[arg(short, long)]
    files: bool,
}

impl StatusArgs {
    pub async fn execute(&self, ctx: &Context, config: Config) -> anyhow::Result<()> {
        let (_orchestrator, handle) = ctx.open(config).await?;
        let settings = handle.settings();
        let snapshot = ChangeDetector.detect(&handle, Priority::High).await;

        println!();
        println!("Project: {} ({})", handle.path().display(), handle.id());

        if let Some(error) = &snapshot.scan_error {
            println!("  Scan failed: {}", error);
            return Ok(());
        }

        println!(
            "  Changes: {} files, +{} -{}",
            snapshot.file_count(),
            snapshot.lines_added,
            snapshot.lines_removed
        );
        println!(
            "  Threshold: {} files or {} lines ({})",
            settings.min_changed_files_threshold,
            settings.min_changed_lines_threshold,
            if snapshot.should_create_branch {
                "checkpoint due"
            } else {
                "below threshold"
            }
        );
        println!(
            "  Next branch: {} ({})",
            snapshot.suggested_branch_name, snapshot.suggested_branch_type
        );

        if self.files || ctx.verbose {
            println!();
            for file in &snapshot.files {
                println!("    {:?} {}", file.kind, file.path);
            }
        }

        let stats = handle.throttler().stats();
        println!();
        println!("Throttler:");
        println!("  Queued: {}  Running: {}  Retrying: {}", stats.queued, stats.running, stats.retrying);
        println!(
            "  Breaker: {} ({} consecutive failures)",
            stats.breaker, stats.failure_count
        );
        println!(
            "  Succeeded: {}  Failed: {}  Rejected: {}",
            stats.succeeded, stats.failed, stats.rejected
        );

        Ok(())
    }
}
