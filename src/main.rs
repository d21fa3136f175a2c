use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "refit")]
#[command(version, about = "Agent-driven repository upgrade runner")]
pub struct Cli {
    /// Working directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress progress output; the final summary still prints
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Auto-approve ask-mode validation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Plan and execute an upgrade run
    Run {
        /// Execution mode: standard or tournament
        #[arg(short, long)]
        mode: Option<String>,

        /// Overall objective folded into every step's guidance
        #[arg(long)]
        objective: Option<String>,

        /// Extra scope to upgrade (repeatable); each adds one module
        #[arg(long = "scope")]
        scopes: Vec<String>,

        /// Validation policy: auto, ask, or skip
        #[arg(long)]
        validation: Option<String>,

        /// Keep executing modules after one fails
        #[arg(long)]
        continue_on_failure: bool,

        /// Agent command to spawn (overrides refit.toml and REFIT_AGENT_CMD)
        #[arg(long)]
        agent_cmd: Option<String>,
    },
    /// Build and print the upgrade plan without executing it
    Plan {
        /// Extra scope to include (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<String>,

        /// Print the plan as pretty JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let working_dir = match cli.dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            mode,
            objective,
            scopes,
            validation,
            continue_on_failure,
            agent_cmd,
        } => {
            cmd::cmd_run(
                &cli,
                working_dir,
                mode.as_deref(),
                objective.as_deref(),
                scopes,
                validation.as_deref(),
                *continue_on_failure,
                agent_cmd.as_deref(),
            )
            .await?;
        }
        Commands::Plan { scopes, json } => {
            cmd::cmd_plan(working_dir, scopes, *json)?;
        }
    }

    Ok(())
}
