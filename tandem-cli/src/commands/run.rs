//! Run command handlers
//!
//! Listing, details, per-action logs and cancellation.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use tandem_core::domain::log::{LogEntry, LogLevel};
use tandem_core::domain::run::{ActionRun, PipelineRun, RunStatus, StepStatus};
use tandem_core::dto::run::RunSummary;

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// List runs, newest first
    List {
        /// Only runs of this pipeline
        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// Show a run with its stages and actions
    Get {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Show the diagnostic logs of one action
    Logs {
        /// Run ID or unambiguous prefix
        id: String,

        /// Action name, e.g. build-arm64
        action: String,
    },
    /// Cancel a run in progress
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
}

pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunCommands::List { pipeline } => {
            let runs = client.list_runs(pipeline.as_deref()).await?;
            if runs.is_empty() {
                println!("{}", "No runs found.".yellow());
            } else {
                println!("{}", format!("Found {} run(s):", runs.len()).bold());
                println!();
                for run in &runs {
                    print_run_summary(run);
                }
            }
        }
        RunCommands::Get { id } => {
            let id = resolve_run_id(&client, &IdOrPrefix::parse(&id)).await?;
            print_run_details(&client.get_run(id).await?);
        }
        RunCommands::Logs { id, action } => {
            let id = resolve_run_id(&client, &IdOrPrefix::parse(&id)).await?;
            let logs = client.get_action_logs(id, &action).await?;
            if logs.is_empty() {
                println!("{}", format!("No logs recorded for '{}'.", action).yellow());
            } else {
                println!("{}", format!("Logs for {} in run {}:", action, id).bold());
                println!("{}", "─".repeat(80).dimmed());
                for log in &logs {
                    print_log_entry(log);
                }
                println!("{}", "─".repeat(80).dimmed());
            }
        }
        RunCommands::Cancel { id } => {
            let id = resolve_run_id(&client, &IdOrPrefix::parse(&id)).await?;
            let response = client.cancel_run(id).await?;
            if response.cancelled {
                println!("{} Cancellation requested for {}", "✓".green(), id);
            } else {
                println!("{}", format!("Run {} has already finished.", id).yellow());
            }
        }
    }

    Ok(())
}

fn print_run_summary(run: &RunSummary) {
    println!(
        "  {} {} {}",
        "▸".cyan(),
        run.pipeline.bold(),
        run.id.to_string().dimmed()
    );
    println!("    Status:   {}", colorize_run_status(run.status));
    println!("    Stage:    {}", run.current_stage);
    println!(
        "    Created:  {}",
        run.requested_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(error) = &run.error {
        println!("    Error:    {}", error.red());
    }
    println!();
}

fn print_run_details(run: &PipelineRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!("  Pipeline:  {}", run.pipeline);
    println!("  Trigger:   {}", run.trigger.kind());
    println!("  Status:    {}", colorize_run_status(run.status));
    println!(
        "  Requested: {}",
        run.requested_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(completed) = run.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
        if let Some(started) = run.started_at {
            let seconds = completed.signed_duration_since(started).num_seconds();
            println!("  Duration:  {}s", seconds);
        }
    }

    for stage in &run.stages {
        println!(
            "\n{} {} ({})",
            "Stage".bold(),
            stage.name.bold(),
            colorize_step_status(stage.status)
        );
        for action in &stage.actions {
            print_action(action);
        }
    }

    if !run.artifacts.is_empty() {
        println!("\n{}", "Artifacts:".bold());
        for (reference, artifact) in &run.artifacts {
            let content = serde_json::to_string(&artifact.content)
                .unwrap_or_else(|_| artifact.content.kind().to_string());
            println!("  {} = {}", reference.as_str().cyan(), content.dimmed());
        }
    }

    if let Some(error) = &run.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

fn print_action(action: &ActionRun) {
    println!(
        "  {} {:<14} {}",
        "▸".cyan(),
        action.name,
        colorize_step_status(action.status)
    );
    if let Some(failure) = &action.failure {
        println!("      {} {}", failure.code.red(), failure.message);
    }
}

fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

fn colorize_run_status(status: RunStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RunStatus::Pending => text.yellow(),
        RunStatus::Running => text.cyan(),
        RunStatus::Succeeded => text.green(),
        RunStatus::Failed | RunStatus::TimedOut => text.red(),
        RunStatus::Cancelled => text.dimmed(),
    }
}

fn colorize_step_status(status: StepStatus) -> ColoredString {
    let text = format!("{:?}", status);
    match status {
        StepStatus::Pending => text.dimmed(),
        StepStatus::Running => text.cyan(),
        StepStatus::Succeeded => text.green(),
        StepStatus::Failed => text.red(),
        StepStatus::Cancelled => text.yellow(),
    }
}
