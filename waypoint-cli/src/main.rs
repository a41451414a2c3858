//! Waypoint CLI - Command line interface for Waypoint
//!
//! Automated git checkpointing for agent-edited working trees.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use waypoint_core::Config;

use commands::{
    CheckpointArgs, HistoryArgs, InitArgs, PushArgs, RollbackArgs, StatusArgs, WatchArgs,
};

/// Waypoint: automated git checkpoints, pushes and rollbacks
#[derive(Parser, Debug)]
#[command(name = "waypoint")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.config/waypoint/config.toml)
    #[arg(long, global = true, env = "WAYPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Project directory
    #[arg(short = 'C', long, global = true, default_value = ".")]
    project: PathBuf,

    /// Committer name (overrides config and env)
    #[arg(long, global = true)]
    committer_name: Option<String>,

    /// Committer email (overrides config and env)
    #[arg(long, global = true)]
    committer_email: Option<String>,

    /// Commit message generator command (overrides config and env)
    #[arg(long, global = true)]
    message_command: Option<String>,

    /// Keep settings, history and events in memory only
    #[arg(long, global = true)]
    no_store: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Register a project, creating the repository if needed
    Init(InitArgs),

    /// Show pending changes and throttler state
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Take a checkpoint now
    #[command(visible_alias = "cp")]
    Checkpoint(CheckpointArgs),

    /// Push a branch if it still points at the expected head
    Push(PushArgs),

    /// Reset the working tree to an earlier commit or branch
    Rollback(RollbackArgs),

    /// Show recent checkpoints and operations
    History(HistoryArgs),

    /// Take checkpoints on a timer until interrupted
    Watch(WatchArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = Config::load_with_overrides(
        cli.config.as_deref(),
        cli.committer_name.clone(),
        cli.committer_email.clone(),
        cli.message_command.clone(),
    )?;

    if cli.verbose {
        tracing::info!(
            identity = ?config.identity.as_ref().map(|i| &i.email),
            message_command = ?config.message.command,
            max_concurrent = config.throttle.max_concurrent_commands,
            "Configuration loaded"
        );
    }

    let ctx = commands::Context {
        project: cli.project.clone(),
        no_store: cli.no_store,
        verbose: cli.verbose,
    };

    match cli.command {
        Some(Commands::Version) => {
            println!("waypoint {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init(args)) => args.execute(&ctx, config).await?,
        Some(Commands::Status(args)) => args.execute(&ctx, config).await?,
        Some(Commands::Checkpoint(args)) => args.execute(&ctx, config).await?,
        Some(Commands::Push(args)) => args.execute(&ctx, config).await?,
        Some(Commands::Rollback(args)) => args.execute(&ctx, config).await?,
        Some(Commands::History(args)) => args.execute(&ctx, config).await?,
        Some(Commands::Watch(args)) => args.execute(&ctx, config).await?,
        Some(Commands::Config) => commands::config::show(&config, cli.config.as_deref()),
        None => {
            println!("Waypoint - automated git checkpoints for agent-edited working trees");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
