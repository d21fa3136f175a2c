//! Terminal rendering for runs: progress bars, event lines, run summary,
//! and the ask-mode confirmation prompt.

use async_trait::async_trait;
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use crate::orchestrator::{RunEvent, RunObserver};
use crate::report::{ModuleStatus, RepoUpgradeReport, RunStatus};
use crate::validation::ConfirmValidation;

/// Observer that renders run progress with `indicatif`.
///
/// Two bars are stacked: a module bar tracking how many modules have
/// finished, and a step spinner showing what the agent is doing right now.
pub struct ConsoleObserver {
    multi: MultiProgress,
    module_bar: ProgressBar,
    step_bar: ProgressBar,
    verbose: bool,
}

impl ConsoleObserver {
    /// Create the observer. `total_modules` sizes the module bar; `quiet`
    /// hides all bar output (the final summary is printed elsewhere).
    pub fn new(total_modules: u64, verbose: bool, quiet: bool) -> Self {
        let multi = MultiProgress::new();
        if quiet {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }

        let module_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let module_bar = multi.add(ProgressBar::new(total_modules));
        module_bar.set_style(module_style);
        module_bar.set_prefix("Modules");

        let step_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let step_bar = multi.add(ProgressBar::new_spinner());
        step_bar.set_style(step_style);
        step_bar.set_prefix("   Step");

        Self {
            multi,
            module_bar,
            step_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` so
    /// nothing user-facing is lost when the rich UI is unavailable.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }
}

impl RunObserver for ConsoleObserver {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::ModuleStarted {
                label, step_count, ..
            } => {
                self.step_bar.enable_steady_tick(Duration::from_millis(100));
                self.step_bar.set_message(format!(
                    "{} {}",
                    style(label).yellow(),
                    style(format!("({} steps)", step_count)).dim()
                ));
            }
            RunEvent::StepCompleted {
                step_id,
                variant,
                success,
                score,
                summary,
                ..
            } => {
                let mark = if *success {
                    style("✓").green().to_string()
                } else {
                    style("✗").red().to_string()
                };
                self.step_bar
                    .set_message(format!("{} {} [{}]", mark, step_id, variant));
                if self.verbose {
                    self.print_line(format!(
                        "    {} {} [{}] score {:.2}: {}",
                        mark,
                        step_id,
                        variant,
                        score,
                        style(snippet(summary, 80)).dim()
                    ));
                }
            }
            RunEvent::ModuleCompleted { module_id, status } => {
                self.module_bar.inc(1);
                let line = match status {
                    ModuleStatus::Completed => {
                        format!("  {} {}", style("✓").green(), module_id)
                    }
                    ModuleStatus::Failed => format!(
                        "  {} {} {}",
                        style("✗").red(),
                        module_id,
                        style("(failed)").red()
                    ),
                    ModuleStatus::Skipped => format!(
                        "  {} {} {}",
                        style("-").dim(),
                        module_id,
                        style("(skipped)").dim()
                    ),
                };
                self.print_line(line);
            }
            RunEvent::RunCompleted { .. } => {
                self.step_bar.finish_and_clear();
                self.module_bar.finish_and_clear();
            }
        }
    }
}

/// Print the styled end-of-run summary.
pub fn print_report_summary(report: &RepoUpgradeReport) {
    let status = match report.status {
        RunStatus::Completed => style("completed").green().bold(),
        RunStatus::Failed => style("failed").red().bold(),
        RunStatus::Partial => style("partial").yellow().bold(),
    };

    println!();
    println!("{} {}", style("Run status:").bold(), status);
    println!(
        "  modules: {} completed, {} failed, {} skipped",
        report.totals.modules_completed,
        report.totals.modules_failed,
        report.totals.modules_skipped
    );
    println!(
        "  steps:   {} executed, mean score {:.2}",
        report.totals.steps_executed, report.totals.mean_score
    );

    for module in &report.modules {
        let mark = match module.status {
            ModuleStatus::Completed => style("✓").green().to_string(),
            ModuleStatus::Failed => style("✗").red().to_string(),
            ModuleStatus::Skipped => style("-").dim().to_string(),
        };
        let executed = module.validations.iter().filter(|v| !v.skipped).count();
        let passed = module
            .validations
            .iter()
            .filter(|v| !v.skipped && v.success)
            .count();
        let validations = if module.validations.is_empty() {
            style("no validations".to_string()).dim().to_string()
        } else if executed == 0 {
            style(format!("{} validations skipped", module.validations.len()))
                .dim()
                .to_string()
        } else {
            format!("{}/{} validations passed", passed, executed)
        };
        println!("  {} {}: {}", mark, module.module_id, validations);

        for validation in module.validations.iter().filter(|v| !v.success && !v.skipped) {
            println!(
                "      {} {}: {}",
                style("!").red(),
                validation.command,
                snippet(validation.error.as_deref().unwrap_or("failed"), 60)
            );
        }
    }

    if !report.validations_executed {
        println!("  {}", style("validations skipped by request").dim());
    }
}

/// Interactive ask-mode confirmation backed by `dialoguer`. The `--yes`
/// flag turns it into an auto-approver for non-interactive runs.
pub struct TerminalConfirm {
    auto_yes: bool,
}

impl TerminalConfirm {
    pub fn new(auto_yes: bool) -> Self {
        Self { auto_yes }
    }
}

#[async_trait]
impl ConfirmValidation for TerminalConfirm {
    async fn confirm(&self, module_id: &str, commands: &[String]) -> bool {
        if self.auto_yes {
            println!(
                "  {} validations for {} (--yes flag)",
                style("Auto-approved").dim(),
                module_id
            );
            return true;
        }

        println!(
            "\n{} {}",
            style("Validation commands for").bold(),
            style(module_id).yellow()
        );
        for command in commands {
            println!("    {}", style(command).cyan());
        }

        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Run these validation commands?")
            .default(true)
            .interact()
            .unwrap_or(false)
    }
}

/// First line of `text`, truncated to `max_len` chars with an ellipsis.
fn snippet(text: &str, max_len: usize) -> String {
    let first_line = text.lines().next().unwrap_or(text).trim();
    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        let head: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
