//! Trigger command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use tandem_core::domain::event::RegistryPushEvent;
use tandem_core::dto::trigger::TriggerResponse;

use crate::config::Config;

/// Trigger subcommands
#[derive(Subcommand)]
pub enum TriggerCommands {
    /// Report a push to the source repository
    Source {
        /// Branch that was pushed
        #[arg(short, long, default_value = "prod")]
        branch: String,

        /// Commit the branch now points at
        commit: String,
    },
    /// Report an image push to the registry
    Registry {
        /// Pushed image, e.g. registry.example/app:latest
        image_uri: String,

        /// Manifest digest of the pushed image
        #[arg(long)]
        digest: Option<String>,
    },
}

pub async fn handle_trigger_command(command: TriggerCommands, config: &Config) -> Result<()> {
    let client = config.client();

    let response = match command {
        TriggerCommands::Source { branch, commit } => client
            .trigger_source(&branch, &commit)
            .await
            .context("Failed to report source push")?,
        TriggerCommands::Registry { image_uri, digest } => {
            let event = RegistryPushEvent {
                image_uri: Some(image_uri),
                digest,
                ..Default::default()
            };
            client
                .trigger_registry(&event)
                .await
                .context("Failed to report registry push")?
        }
    };

    print_started(&response);
    Ok(())
}

fn print_started(response: &TriggerResponse) {
    if response.runs.is_empty() {
        println!("{}", "No pipeline accepted the event.".yellow());
        return;
    }

    for run in &response.runs {
        println!(
            "{} Started {} run {}",
            "✓".green(),
            run.pipeline.bold(),
            run.run_id.to_string().cyan()
        );
    }
}
