//! Full upgrade flow, `refit run`: plan, execute, validate, report.

use anyhow::{Context, Result};
use refit::config::{RefitToml, RunOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::super::Cli;

pub async fn cmd_run(
    cli: &Cli,
    working_dir: PathBuf,
    mode: Option<&str>,
    objective: Option<&str>,
    scopes: &[String],
    validation: Option<&str>,
    continue_on_failure: bool,
    agent_cmd: Option<&str>,
) -> Result<()> {
    use refit::agent::CliAgent;
    use refit::config::get_refit_dir;
    use refit::flow::Flow;
    use refit::plan::PlanBuilder;
    use refit::report::{ReportWriter, RunStatus};
    use refit::ui::{print_report_summary, ConsoleObserver, TerminalConfirm};
    use refit::validation::ProcessShell;

    let working_dir = working_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve working directory: {}", working_dir.display()))?;

    let refit_dir = get_refit_dir(&working_dir);
    let config = RefitToml::load_or_default(&refit_dir)?;

    let options = resolve_run_options(
        working_dir.clone(),
        &config,
        mode,
        objective,
        scopes,
        validation,
        continue_on_failure,
    )?;
    let agent_command = agent_cmd
        .map(str::to_string)
        .unwrap_or_else(|| config.agent_cmd());

    let plan = PlanBuilder::new(&options.working_dir)
        .with_scopes(&options.additional_scopes)
        .with_objective(options.objective.as_deref())
        .build()?;

    if !cli.quiet {
        println!(
            "{} {} module(s), {} step(s), {} mode",
            console::style("Plan:").bold(),
            plan.modules.len(),
            plan.step_count(),
            options.mode
        );
        if cli.verbose {
            println!("  agent command: {}", agent_command);
        }
    }

    let step_timeout = Duration::from_secs(config.run.step_timeout_secs);
    let agent = Arc::new(CliAgent::new(&agent_command, &working_dir, step_timeout));
    let ui = Arc::new(ConsoleObserver::new(
        plan.modules.len() as u64,
        cli.verbose,
        cli.quiet,
    ));

    let flow = Flow::new(agent, Arc::new(ProcessShell))
        .with_confirm(Arc::new(TerminalConfirm::new(cli.yes)))
        .with_observer(ui);

    let report = flow.execute_plan(&plan, &options).await;

    let report_path = ReportWriter::new(&refit_dir).write(&report)?;

    print_report_summary(&report);
    println!("Run report saved to: {}", report_path.display());

    match report.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Failed => anyhow::bail!(
            "Run failed: {} of {} module(s) failed",
            report.totals.modules_failed,
            report.modules.len()
        ),
        RunStatus::Partial => anyhow::bail!(
            "Run incomplete: {} module(s) failed, {} skipped",
            report.totals.modules_failed,
            report.totals.modules_skipped
        ),
    }
}

/// Layer the config file under the CLI flags (CLI wins) into resolved
/// [`RunOptions`].
///
/// This is pure logic that can be unit-tested without external processes.
pub fn resolve_run_options(
    working_dir: PathBuf,
    config: &RefitToml,
    mode: Option<&str>,
    objective: Option<&str>,
    scopes: &[String],
    validation: Option<&str>,
    continue_on_failure: bool,
) -> Result<RunOptions> {
    let mode = match mode {
        Some(s) => s.parse()?,
        None => config.run.mode,
    };
    let validation_mode = match validation {
        Some(s) => s.parse()?,
        None => config.run.validation,
    };

    Ok(RunOptions {
        working_dir,
        mode,
        continue_on_failure: continue_on_failure || config.run.continue_on_failure,
        additional_scopes: scopes.to_vec(),
        objective: objective.map(str::to_string),
        validation_mode,
    })
}
