//! Push command - push a branch guarded by its expected head

use clap::Args;
use waypoint_core::git::command;
use waypoint_core::{Config, Priority};

use super::checkpoint::print_sync;
use super::Context;

/// Push a branch if it still points at the expected head
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Branch to push (defaults to the checked-out branch)
    #[arg(short, long)]
    branch: Option<String>,

    /// Commit the branch must point at (defaults to its current head)
    #[arg(short, long)]
    expected_head: Option<String>,
}

impl PushArgs {
    pub async fn execute(&self, ctx: &Context, config: Config) -> anyhow::Result<()> {
        let (orchestrator, handle) = ctx.open(config).await?;

        let branch = match &self.branch {
            Some(branch) => branch.clone(),
            None => handle
                .run(command::current_branch(), Priority::High)
                .await
                .map(|b| b.trim().to_string())
                .ok()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| anyhow::anyhow!("HEAD is detached; pass --branch"))?,
        };

        let expected_head = match &self.expected_head {
            Some(head) => head.clone(),
            None => handle
                .run(command::rev_parse_branch(&branch)?, Priority::High)
                .await
                .map_err(|e| anyhow::anyhow!("Branch '{}' not found: {}", branch, e))?
                .trim()
                .to_string(),
        };

        let result = orchestrator.push(&handle, &branch, &expected_head).await;
        print_sync(&result);
        result.into_result()?;
        Ok(())
    }
}
