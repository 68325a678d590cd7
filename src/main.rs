use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "onboard")]
#[command(version, about = "Resumable, approval-gated provisioning workflows")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve every step without prompting
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .onboard directory with a sample onboard.toml
    Init,
    /// Process open work items, or a single item
    Run {
        /// Only process this item
        item_id: Option<String>,

        /// Maximum number of items processed concurrently
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Seconds to wait for an approval before pausing the item (0 waits forever)
        #[arg(long)]
        approval_timeout: Option<u64>,
    },
    /// Show persisted workflow state
    Status { item_id: Option<String> },
    /// List open work items with their persisted status
    List,
    /// Delete the persisted state of one item
    Reset {
        item_id: String,

        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let _log_guard = if onboard::init::is_initialized(&project_dir) {
        let log_dir = onboard::init::get_onboard_dir(&project_dir).join("logs");
        Some(onboard::logging::init(cli.verbose, &log_dir)?)
    } else {
        None
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run {
            item_id,
            max_parallel,
            approval_timeout,
        } => {
            cmd::cmd_run(
                &cli,
                &project_dir,
                item_id.as_deref(),
                *max_parallel,
                *approval_timeout,
            )
            .await?
        }
        Commands::Status { item_id } => cmd::cmd_status(&project_dir, item_id.as_deref())?,
        Commands::List => cmd::cmd_list(&project_dir).await?,
        Commands::Reset { item_id, force } => cmd::cmd_reset(&project_dir, item_id, *force)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
