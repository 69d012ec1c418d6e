//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod run;
mod trigger;

pub use run::RunCommands;
pub use trigger::TriggerCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start pipeline runs from an event
    Trigger {
        #[command(subcommand)]
        command: TriggerCommands,
    },
    /// Inspect and cancel runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Check that the orchestrator is up
    Health,
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Trigger { command } => trigger::handle_trigger_command(command, config).await,
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Health => health(config).await,
    }
}

async fn health(config: &Config) -> Result<()> {
    let health = config.client().health().await?;
    println!(
        "{} {} ({} active run(s))",
        "✓".green(),
        health.status.bold(),
        health.active_runs
    );
    Ok(())
}
