//! Flow coordination: plan, orchestrate, validate, merge.
//!
//! `Flow` owns the collaborators (agent, shell, optional confirmer,
//! observers) and wires the pipeline together. It never mutates plan or
//! step data produced by earlier stages; validation outcomes are the only
//! thing it appends to the report.

use anyhow::Result;
use std::sync::Arc;

use crate::agent::AgentClient;
use crate::config::{RunOptions, ValidationMode};
use crate::orchestrator::{Orchestrator, RunObserver};
use crate::plan::{Plan, PlanBuilder};
use crate::report::RepoUpgradeReport;
use crate::validation::{run_validations_for_module, ConfirmValidation, ShellRunner};

/// The repo-upgrade flow: Plan Builder, Orchestrator, Validation Runner.
pub struct Flow {
    agent: Arc<dyn AgentClient>,
    shell: Arc<dyn ShellRunner>,
    confirm: Option<Arc<dyn ConfirmValidation>>,
    observers: Vec<Arc<dyn RunObserver>>,
}

impl Flow {
    pub fn new(agent: Arc<dyn AgentClient>, shell: Arc<dyn ShellRunner>) -> Self {
        Self {
            agent,
            shell,
            confirm: None,
            observers: Vec::new(),
        }
    }

    /// Attach the ask-mode confirmation collaborator.
    pub fn with_confirm(mut self, confirm: Arc<dyn ConfirmValidation>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Register a lifecycle observer.
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Run the full flow for `options`. Only planning problems (and other
    /// genuinely structural errors) surface as `Err`.
    pub async fn run(&self, options: &RunOptions) -> Result<RepoUpgradeReport> {
        let plan = PlanBuilder::new(&options.working_dir)
            .with_scopes(&options.additional_scopes)
            .with_objective(options.objective.as_deref())
            .build()?;
        Ok(self.execute_plan(&plan, options).await)
    }

    /// Run orchestration and validation over an already-built plan.
    pub async fn execute_plan(&self, plan: &Plan, options: &RunOptions) -> RepoUpgradeReport {
        let mut orchestrator =
            Orchestrator::new(self.agent.clone(), options.mode, options.continue_on_failure);
        for observer in &self.observers {
            orchestrator.add_observer(observer.clone());
        }

        let mut report = orchestrator.run(plan).await;

        // Skip mode never reaches the validation runner at all
        let validations_executed = options.validation_mode != ValidationMode::Skip;
        let mut artifacts = Vec::new();
        if validations_executed {
            for (module_report, module) in report.modules.iter_mut().zip(&plan.modules) {
                let outcomes = run_validations_for_module(
                    module_report,
                    module,
                    &plan.working_dir,
                    options.validation_mode,
                    self.shell.as_ref(),
                    self.confirm.as_deref(),
                )
                .await;
                artifacts.extend(outcomes.iter().cloned());
                module_report.validations = outcomes;
            }
        }
        report.validations_executed = validations_executed;
        report.validation_artifacts = artifacts;

        report.finalize();
        report
    }
}
