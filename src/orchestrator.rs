//! Module/step state machine and lifecycle events.
//!
//! The orchestrator walks the plan strictly in order: modules, then steps
//! within each module. Later steps and modules may depend on tree mutations
//! made by earlier ones, so nothing here runs concurrently. Every transition
//! is announced to registered observers; an observer panic never aborts the
//! run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

use crate::agent::AgentClient;
use crate::config::RunMode;
use crate::executor::{StepExecutionInput, StepExecutor, StepResult, StepVariant};
use crate::plan::{Module, Plan};
use crate::report::{ModuleReport, ModuleStatus, RepoUpgradeReport, RunStatus};

/// Events emitted during a run, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A module is about to execute its steps.
    ModuleStarted {
        module_id: String,
        label: String,
        step_count: usize,
    },
    /// One step variant finished (primary or refiner).
    StepCompleted {
        module_id: String,
        step_id: String,
        variant: StepVariant,
        success: bool,
        score: f64,
        summary: String,
    },
    /// A module reached a terminal status. Skipped modules emit this
    /// without a preceding `ModuleStarted`.
    ModuleCompleted {
        module_id: String,
        status: ModuleStatus,
    },
    /// The whole run reached a terminal status.
    RunCompleted { status: RunStatus },
}

/// Receives lifecycle events synchronously, in emission order.
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Drives a plan to a report.
pub struct Orchestrator {
    executor: StepExecutor,
    mode: RunMode,
    continue_on_failure: bool,
    observers: Vec<Arc<dyn RunObserver>>,
}

impl Orchestrator {
    pub fn new(agent: Arc<dyn AgentClient>, mode: RunMode, continue_on_failure: bool) -> Self {
        Self {
            executor: StepExecutor::new(agent),
            mode,
            continue_on_failure,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn RunObserver>) {
        self.observers.push(observer);
    }

    /// Execute every module in the plan. Step failures become data; the
    /// only way this degrades is through module/run statuses.
    pub async fn run(&self, plan: &Plan) -> RepoUpgradeReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let mut modules: Vec<ModuleReport> = Vec::with_capacity(plan.modules.len());
        let mut abort = false;

        for module in &plan.modules {
            if abort {
                modules.push(self.skip_module(module));
                continue;
            }

            let report = self.run_module(module).await;
            if report.status == ModuleStatus::Failed && !self.continue_on_failure {
                abort = true;
            }
            modules.push(report);
        }

        let any_failed = modules.iter().any(|m| m.status == ModuleStatus::Failed);
        let any_skipped = modules.iter().any(|m| m.status == ModuleStatus::Skipped);
        let status = if any_failed && !self.continue_on_failure {
            if any_skipped {
                RunStatus::Partial
            } else {
                RunStatus::Failed
            }
        } else {
            RunStatus::Completed
        };

        self.emit(RunEvent::RunCompleted { status });

        RepoUpgradeReport::new(run_id, started_at, status, modules)
    }

    async fn run_module(&self, module: &Module) -> ModuleReport {
        self.emit(RunEvent::ModuleStarted {
            module_id: module.id.clone(),
            label: module.label.clone(),
            step_count: module.steps.len(),
        });

        let mut steps: Vec<StepResult> = Vec::new();
        let mut not_attempted: Vec<String> = Vec::new();
        let mut failed = false;

        for step in &module.steps {
            if failed {
                not_attempted.push(step.id.clone());
                continue;
            }

            let primary = self
                .executor
                .execute(StepExecutionInput {
                    step,
                    module,
                    mode: self.mode,
                    variant: StepVariant::Primary,
                    previous: None,
                })
                .await;
            self.emit_step(module, &primary);

            // In refiner modes the second pass always runs and its result
            // decides the step, even when the primary already failed.
            let step_success = if self.mode.runs_refiner() {
                let refiner = self
                    .executor
                    .execute(StepExecutionInput {
                        step,
                        module,
                        mode: self.mode,
                        variant: StepVariant::Refiner,
                        previous: Some(&primary),
                    })
                    .await;
                self.emit_step(module, &refiner);
                let success = refiner.success;
                steps.push(primary);
                steps.push(refiner);
                success
            } else {
                let success = primary.success;
                steps.push(primary);
                success
            };

            if !step_success {
                failed = true;
            }
        }

        let status = if failed {
            ModuleStatus::Failed
        } else {
            ModuleStatus::Completed
        };
        self.emit(RunEvent::ModuleCompleted {
            module_id: module.id.clone(),
            status,
        });

        ModuleReport {
            module_id: module.id.clone(),
            label: module.label.clone(),
            status,
            steps,
            not_attempted,
            validations: Vec::new(),
        }
    }

    fn skip_module(&self, module: &Module) -> ModuleReport {
        self.emit(RunEvent::ModuleCompleted {
            module_id: module.id.clone(),
            status: ModuleStatus::Skipped,
        });
        ModuleReport {
            module_id: module.id.clone(),
            label: module.label.clone(),
            status: ModuleStatus::Skipped,
            steps: Vec::new(),
            not_attempted: module.steps.iter().map(|s| s.id.clone()).collect(),
            validations: Vec::new(),
        }
    }

    fn emit_step(&self, module: &Module, result: &StepResult) {
        self.emit(RunEvent::StepCompleted {
            module_id: module.id.clone(),
            step_id: result.step_id.clone(),
            variant: result.variant,
            success: result.success,
            score: result.score,
            summary: result.summary.clone(),
        });
    }

    fn emit(&self, event: RunEvent) {
        for observer in &self.observers {
            // Observers are untrusted; contain their panics
            let _ = catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
        }
    }
}
