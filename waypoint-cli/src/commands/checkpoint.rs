//! Checkpoint command - take a checkpoint now, optionally pushing it

use clap::Args;
use waypoint_core::{
    BranchType, CheckpointOutcome, CheckpointRequest, Config, SyncResult, Trigger,
};

use super::{short, Context};

/// Take a checkpoint now
#[derive(Args, Debug)]
pub struct CheckpointArgs {
    /// Checkpoint even when the changes are below the threshold
    #[arg(short, long)]
    force: bool,

    /// Conversation id; checkpoints of one conversation form a step chain
    #[arg(long)]
    conversation: Option<String>,

    /// Branch type (feature, bugfix, experiment, iteration, checkpoint, step)
    #[arg(short = 't', long = "type")]
    branch_type: Option<BranchType>,

    /// Push the new branch afterwards
    #[arg(short, long)]
    push: bool,
}

impl CheckpointArgs {
    pub async fn execute(&self, ctx: &Context, config: Config) -> anyhow::Result<()> {
        let (orchestrator, handle) = ctx.open(config).await?;

        let mut request = CheckpointRequest::new(Trigger::User);
        if self.force {
            request = request.forced();
        }
        if let Some(id) = &self.conversation {
            request = request.with_conversation(id.clone());
        }
        if let Some(branch_type) = self.branch_type {
            request = request.with_branch_type(branch_type);
        }

        let (outcome, sync) = if self.push {
            let cycle = orchestrator.checkpoint_and_push(&handle, request).await?;
            (cycle.checkpoint, cycle.sync)
        } else {
            (orchestrator.checkpoint(&handle, request).await?, None)
        };

        match &outcome {
            CheckpointOutcome::Created(record) => {
                println!("Created {} at {}", record.branch_name(), short(record.commit_hash()));
                println!("  {}", record.commit.message);
                println!(
                    "  {} files, +{} -{}",
                    record.commit.files_changed, record.lines_added, record.lines_removed
                );
                if let Some(parent) = &record.branch.parent {
                    println!("  Parent: {}", parent);
                }
            }
            CheckpointOutcome::Skipped(reason) => {
                println!("No checkpoint: {}", reason);
            }
        }

        if let Some(sync) = sync {
            print_sync(&sync);
            sync.into_result()?;
        }

        Ok(())
    }
}

pub fn print_sync(result: &SyncResult) {
    println!(
        "Push {} ({}): {}",
        result.branch,
        short(&result.expected_head),
        result.outcome
    );
}
