//! Rollback command

use clap::Args;
use waypoint_core::{Config, RollbackOptions};

use super::{short, Context};

/// Reset the working tree to an earlier commit or branch
#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Commit, branch or remote branch (e.g. origin/feature/x)
    target: String,

    /// Do not create a backup branch of the current head
    #[arg(long)]
    no_backup: bool,

    /// Discard uncommitted changes instead of stashing them
    #[arg(long)]
    no_stash: bool,
}

impl RollbackArgs {
    pub async fn execute(&self, ctx: &Context, config: Config) -> anyhow::Result<()> {
        let (orchestrator, handle) = ctx.open(config).await?;

        let options = RollbackOptions {
            create_backup: !self.no_backup,
            stash_uncommitted: !self.no_stash,
        };
        let record = orchestrator.rollback(&handle, &self.target, options).await?;

        println!(
            "Rolled back {} to {}",
            record.source_branch.as_deref().unwrap_or("detached HEAD"),
            record.resolved_commit.as_deref().map(short).unwrap_or("?")
        );
        if let Some(head) = &record.source_head {
            println!("  Previous head: {}", short(head));
        }
        if let Some(backup) = &record.backup_branch {
            println!("  Backup branch: {}", backup);
        }
        if record.stashed {
            println!("  Uncommitted changes stashed (git stash list)");
        }
        println!("  The next push of this branch will use --force-with-lease");

        Ok(())
    }
}
