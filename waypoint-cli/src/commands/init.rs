//! Init command - register a project and apply its settings

use std::path::PathBuf;

use clap::Args;
use waypoint_core::{CheckpointOutcome, CheckpointRequest, Config, Trigger};

use super::Context;

/// Register a project, creating the repository if needed
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to initialise (defaults to --project)
    path: Option<PathBuf>,

    /// Enable pushing to the remote
    #[arg(long)]
    remote: bool,

    /// URL to add as the remote when it is missing
    #[arg(long)]
    remote_url: Option<String>,

    /// Remote name to push to
    #[arg(long)]
    remote_name: Option<String>,

    /// Branch glob to push (repeatable)
    #[arg(long = "sync", value_name = "PATTERN")]
    sync_patterns: Vec<String>,

    /// Take a checkpoint right after initialising
    #[arg(long)]
    checkpoint: bool,
}

impl InitArgs {
    pub async fn execute(&self, ctx: &Context, config: Config) -> anyhow::Result<()> {
        let orchestrator = ctx.orchestrator(config).await?;
        let path = self.path.clone().unwrap_or_else(|| ctx.project.clone());

        let (handle, initial) = orchestrator.init_project(&path).await?;

        let mut settings = handle.settings();
        let mut changed = false;
        if self.remote || self.remote_url.is_some() {
            settings.remote_enabled = true;
            changed = true;
        }
        if let Some(url) = &self.remote_url {
            settings.remote_url = Some(url.clone());
        }
        if let Some(name) = &self.remote_name {
            settings.remote_name = name.clone();
            changed = true;
        }
        if !self.sync_patterns.is_empty() {
            settings.sync_branch_patterns = self.sync_patterns.clone();
            changed = true;
        }
        if self.checkpoint {
            settings.auto_checkpoint_on_init = true;
            changed = true;
        }
        if changed {
            orchestrator.update_settings(&handle, settings.clone()).await?;
        }

        println!("Initialised {}", handle.path().display());
        println!("  Project id: {}", handle.id());
        println!("  Default branch: {}", handle.project().default_branch);
        if settings.remote_enabled {
            println!(
                "  Remote: {}{}",
                settings.remote_name,
                settings
                    .remote_url
                    .as_deref()
                    .map(|u| format!(" ({})", u))
                    .unwrap_or_default()
            );
        } else {
            println!("  Remote: disabled");
        }

        // The setting was just turned on, so init_project did not see it
        let initial = match initial {
            Some(outcome) => Some(outcome),
            None if self.checkpoint => Some(
                orchestrator
                    .checkpoint(&handle, CheckpointRequest::new(Trigger::External).forced())
                    .await?,
            ),
            None => None,
        };
        match initial {
            Some(CheckpointOutcome::Created(record)) => {
                println!(
                    "  Initial checkpoint: {} at {}",
                    record.branch_name(),
                    super::short(record.commit_hash())
                );
            }
            Some(CheckpointOutcome::Skipped(reason)) => {
                println!("  Initial checkpoint skipped: {}", reason);
            }
            None => {}
        }

        Ok(())
    }
}
