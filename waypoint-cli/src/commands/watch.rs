//! Watch command - timer-driven checkpoints until interrupted

use std::time::Duration;

use clap::Args;
use tokio::sync::watch;
use waypoint_core::{AutoCheckpointer, Config};

use super::Context;

/// Take checkpoints on a timer until interrupted
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Seconds between checkpoint attempts (defaults to [watch] interval)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Do not push new checkpoints
    #[arg(long)]
    no_push: bool,
}

impl WatchArgs {
    pub async fn execute(&self, ctx: &Context, config: Config) -> anyhow::Result<()> {
        let (orchestrator, handle) = ctx.open(config).await?;

        let mut timer = AutoCheckpointer::new(orchestrator.clone(), handle.clone());
        if let Some(secs) = self.interval {
            timer = timer.with_interval(Duration::from_secs(secs));
        }
        if self.no_push {
            timer = timer.with_push(false);
        }

        let mut events = orchestrator.subscribe();
        let printer = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                println!(
                    "[{}] {} {}{}",
                    event.timestamp.format("%H:%M:%S"),
                    event.operation,
                    event.status,
                    event
                        .branch
                        .as_deref()
                        .map(|b| format!(" {}", b))
                        .unwrap_or_default()
                );
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(timer.run(shutdown_rx));

        println!("Watching {} (Ctrl-C to stop)", handle.path().display());
        tokio::signal::ctrl_c().await?;

        let _ = shutdown_tx.send(true);
        worker.await?;
        printer.abort();
        Ok(())
    }
}
