//! Run report model and persistence.
//!
//! The report is the single source of truth for what a run did: every module
//! outcome, every step result, every validation that ran or was skipped and
//! why. `ReportWriter` persists it as pretty JSON under `.refit/runs/`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::executor::StepResult;

/// Post-execution status of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleStatus::Completed => write!(f, "completed"),
            ModuleStatus::Failed => write!(f, "failed"),
            ModuleStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Terminal status of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// All modules ran to completion (individual step failures allowed under
    /// continue-on-failure)
    Completed,
    /// A module failed under strict mode and nothing was skipped after it
    Failed,
    /// A failure caused later modules to be skipped
    Partial,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Partial => write!(f, "partial"),
        }
    }
}

/// Why a validation command was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The owning module did not complete, so its validations never ran
    ModuleSkipped,
    /// Ask-mode confirmation was refused or unavailable
    ConfirmationRequired,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ModuleSkipped => write!(f, "module-skipped"),
            SkipReason::ConfirmationRequired => write!(f, "confirmation-required"),
        }
    }
}

/// Result of one validation command: executed (pass/fail) or skipped with a
/// reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub command: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

impl ValidationOutcome {
    /// Record for a command that was never executed.
    pub fn skipped(command: &str, reason: SkipReason) -> Self {
        Self {
            command: command.to_string(),
            success: false,
            output: String::new(),
            error: None,
            duration_ms: 0,
            skipped: true,
            reason: Some(reason),
        }
    }
}

/// One module's slice of the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleReport {
    pub module_id: String,
    pub label: String,
    pub status: ModuleStatus,
    /// Results for every step that actually ran, in execution order
    pub steps: Vec<StepResult>,
    /// Ids of planned steps that were never attempted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_attempted: Vec<String>,
    #[serde(default)]
    pub validations: Vec<ValidationOutcome>,
}

/// Aggregate counts for the run summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub modules_completed: usize,
    pub modules_failed: usize,
    pub modules_skipped: usize,
    pub steps_executed: usize,
    /// Mean step score across all executed steps, 0.0 when none ran
    pub mean_score: f64,
}

/// The final aggregate for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoUpgradeReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub modules: Vec<ModuleReport>,
    /// Flat view of every validation outcome across modules
    #[serde(default)]
    pub validation_artifacts: Vec<ValidationOutcome>,
    /// True when the validation mode resolved to anything except `skip`
    pub validations_executed: bool,
    pub totals: RunTotals,
}

impl RepoUpgradeReport {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        status: RunStatus,
        modules: Vec<ModuleReport>,
    ) -> Self {
        let mut report = Self {
            run_id,
            started_at,
            finished_at: None,
            status,
            modules,
            validation_artifacts: Vec::new(),
            validations_executed: false,
            totals: RunTotals::default(),
        };
        report.recompute_totals();
        report
    }

    /// Recount module/step totals from the current report contents.
    pub fn recompute_totals(&mut self) {
        let mut totals = RunTotals::default();
        let mut score_sum = 0.0;
        for module in &self.modules {
            match module.status {
                ModuleStatus::Completed => totals.modules_completed += 1,
                ModuleStatus::Failed => totals.modules_failed += 1,
                ModuleStatus::Skipped => totals.modules_skipped += 1,
            }
            for step in &module.steps {
                totals.steps_executed += 1;
                score_sum += step.score;
            }
        }
        totals.mean_score = if totals.steps_executed == 0 {
            0.0
        } else {
            score_sum / totals.steps_executed as f64
        };
        self.totals = totals;
    }

    /// Stamp the finish time and refresh totals. Called once all validation
    /// outcomes are merged in.
    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
        self.recompute_totals();
    }
}

/// Writes finished reports to `<refit_dir>/runs/`.
pub struct ReportWriter {
    runs_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(refit_dir: &Path) -> Self {
        Self {
            runs_dir: refit_dir.join("runs"),
        }
    }

    /// Persist the report as pretty JSON. Returns the file path.
    pub fn write(&self, report: &RepoUpgradeReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.runs_dir).with_context(|| {
            format!("Failed to create runs directory {}", self.runs_dir.display())
        })?;

        let filename = format!(
            "{}_{}.json",
            report.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &report.run_id.to_string()[..8]
        );
        let path = self.runs_dir.join(filename);

        let json =
            serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        Ok(path)
    }
}
