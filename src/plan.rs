//! Upgrade plan model and derivation for the refit orchestrator.
//!
//! This module provides:
//! - `Plan`, `Module`, `Step`: the static description of one upgrade run
//! - `PlanBuilder`: derives a plan from a working directory's top-level layout
//!
//! Plan derivation is deterministic for a given directory structure and scope
//! list, and never executes a step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::errors::PlanningError;

/// What a step is meant to do within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepIntent {
    /// Change the tree within the module's scope
    Modify,
    /// Check the changes without introducing new ones
    Verify,
}

impl std::fmt::Display for StepIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepIntent::Modify => write!(f, "modify"),
            StepIntent::Verify => write!(f, "verify"),
        }
    }
}

/// One atomic unit of work within a module. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier (e.g. "dependency-upgrade-modify")
    pub id: String,
    /// What the step is meant to do
    pub intent: StepIntent,
    /// Human-readable description sent to the agent
    pub description: String,
    /// Optional free-text guidance appended to the prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl Step {
    pub fn new(id: &str, intent: StepIntent, description: &str) -> Self {
        Self {
            id: id.to_string(),
            intent,
            description: description.to_string(),
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }
}

/// A scoped group of upgrade steps sharing a path scope and command set.
///
/// Read-only during execution; outcome data lives on the report side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module identifier (e.g. "dependency-upgrade")
    pub id: String,
    /// Human-readable label
    pub label: String,
    /// Path prefixes/patterns this module covers
    pub scope: Vec<String>,
    /// Ordered steps
    pub steps: Vec<Step>,
    /// Suggested codemod commands, shown to the agent as guidance and
    /// never executed by refit
    #[serde(default)]
    pub codemod_commands: Vec<String>,
    /// Shell commands that objectively check the module's result
    #[serde(default)]
    pub validation_commands: Vec<String>,
}

/// Ordered sequence of modules for one run. Built once; immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Directory the plan was derived from
    pub working_dir: PathBuf,
    /// Modules in execution order
    pub modules: Vec<Module>,
}

impl Plan {
    /// Total number of steps across all modules.
    pub fn step_count(&self) -> usize {
        self.modules.iter().map(|m| m.steps.len()).sum()
    }
}

/// Package ecosystems recognized by the plan builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ecosystem {
    Cargo,
    Node,
    Python,
    Go,
}

impl Ecosystem {
    /// Manifest file that marks this ecosystem, in detection order.
    const ALL: [(Ecosystem, &'static str); 4] = [
        (Ecosystem::Cargo, "Cargo.toml"),
        (Ecosystem::Node, "package.json"),
        (Ecosystem::Python, "pyproject.toml"),
        (Ecosystem::Go, "go.mod"),
    ];

    fn codemod_command(&self) -> &'static str {
        match self {
            Ecosystem::Cargo => "cargo update --dry-run",
            Ecosystem::Node => "npm outdated",
            Ecosystem::Python => "pip list --outdated",
            Ecosystem::Go => "go list -u -m all",
        }
    }

    fn validation_command(&self) -> &'static str {
        match self {
            Ecosystem::Cargo => "cargo test",
            Ecosystem::Node => "npm test --silent",
            Ecosystem::Python => "python -m pytest -q",
            Ecosystem::Go => "go test ./...",
        }
    }
}

/// Source directories that mark code worth modernizing.
const SOURCE_DIRS: [&str; 3] = ["src", "lib", "app"];

/// Directories that mark an existing test suite.
const TEST_DIRS: [&str; 3] = ["tests", "test", "spec"];

/// Derives an upgrade plan from a working directory.
///
/// Detection looks at top-level entries only. Modules always appear in the
/// same order: dependency upgrade, source modernization, test hardening
/// (when a test directory exists), then one module per additional scope.
pub struct PlanBuilder {
    working_dir: PathBuf,
    additional_scopes: Vec<String>,
    objective: Option<String>,
}

impl PlanBuilder {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            additional_scopes: Vec::new(),
            objective: None,
        }
    }

    /// Add extra scopes, each yielding one additional module.
    pub fn with_scopes(mut self, scopes: &[String]) -> Self {
        self.additional_scopes = scopes.to_vec();
        self
    }

    /// Fold an overall objective into every step's guidance text.
    pub fn with_objective(mut self, objective: Option<&str>) -> Self {
        self.objective = objective.map(|s| s.to_string());
        self
    }

    /// Build the plan. Fails only on structural problems with the working
    /// directory; an empty or unrecognized directory still yields a plan.
    pub fn build(self) -> Result<Plan, PlanningError> {
        if !self.working_dir.is_dir() {
            return Err(PlanningError::NotADirectory {
                path: self.working_dir.clone(),
            });
        }

        // Collect top-level names into sorted sets so the plan does not
        // depend on readdir order.
        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        let entries =
            std::fs::read_dir(&self.working_dir).map_err(|source| PlanningError::UnreadableDirectory {
                path: self.working_dir.clone(),
                source,
            })?;
        for entry in entries {
            let entry = entry.map_err(|source| PlanningError::UnreadableDirectory {
                path: self.working_dir.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                dirs.insert(name);
            } else {
                files.insert(name);
            }
        }

        let ecosystems: Vec<Ecosystem> = Ecosystem::ALL
            .iter()
            .filter(|(_, manifest)| files.contains(*manifest))
            .map(|(eco, _)| *eco)
            .collect();
        let manifests: Vec<String> = Ecosystem::ALL
            .iter()
            .filter(|(_, manifest)| files.contains(*manifest))
            .map(|(_, manifest)| manifest.to_string())
            .collect();
        let codemods: Vec<String> = ecosystems
            .iter()
            .map(|e| e.codemod_command().to_string())
            .collect();
        // Unknown ecosystems fall back to a no-op validation suggestion so
        // the validation stage still has something objective to record.
        let validations: Vec<String> = if ecosystems.is_empty() {
            vec!["true".to_string()]
        } else {
            ecosystems
                .iter()
                .map(|e| e.validation_command().to_string())
                .collect()
        };

        let mut modules = Vec::new();

        let dep_scope = if manifests.is_empty() {
            vec![".".to_string()]
        } else {
            manifests
        };
        modules.push(self.make_module(
            "dependency-upgrade",
            "Dependency upgrade",
            dep_scope,
            "Upgrade outdated dependencies in the detected manifest files to current compatible versions",
            codemods.clone(),
            validations.clone(),
        ));

        let source_scope: Vec<String> = SOURCE_DIRS
            .iter()
            .filter(|d| dirs.contains(**d))
            .map(|d| format!("{}/", d))
            .collect();
        let source_scope = if source_scope.is_empty() {
            vec![".".to_string()]
        } else {
            source_scope
        };
        modules.push(self.make_module(
            "source-modernization",
            "Source modernization",
            source_scope,
            "Modernize the source in scope: adopt current language idioms and replace deprecated APIs",
            Vec::new(),
            validations.clone(),
        ));

        let test_scope: Vec<String> = TEST_DIRS
            .iter()
            .filter(|d| dirs.contains(**d))
            .map(|d| format!("{}/", d))
            .collect();
        if !test_scope.is_empty() {
            modules.push(self.make_module(
                "test-hardening",
                "Test hardening",
                test_scope,
                "Harden the existing test suite: cover behavior changed by this upgrade and remove brittle patterns",
                Vec::new(),
                validations.clone(),
            ));
        }

        for scope in &self.additional_scopes {
            let id = format!("scope-{}", scope_slug(scope));
            let label = format!("Scoped upgrade: {}", scope);
            modules.push(self.make_module(
                &id,
                &label,
                vec![scope.clone()],
                &format!("Apply the requested upgrade within {}", scope),
                Vec::new(),
                validations.clone(),
            ));
        }

        Ok(Plan {
            working_dir: self.working_dir,
            modules,
        })
    }

    fn make_module(
        &self,
        id: &str,
        label: &str,
        scope: Vec<String>,
        modify_description: &str,
        codemod_commands: Vec<String>,
        validation_commands: Vec<String>,
    ) -> Module {
        let guidance = self
            .objective
            .as_ref()
            .map(|o| format!("Overall objective: {}", o));
        let steps = vec![
            Step::new(&format!("{}-modify", id), StepIntent::Modify, modify_description)
                .with_prompt(guidance.clone()),
            Step::new(
                &format!("{}-verify", id),
                StepIntent::Verify,
                "Verify the changes in scope and run the narrowest available tests",
            )
            .with_prompt(guidance),
        ];
        Module {
            id: id.to_string(),
            label: label.to_string(),
            scope,
            steps,
            codemod_commands,
            validation_commands,
        }
    }
}

/// Build a plan directly, without builder options.
pub fn build_plan(
    working_dir: &Path,
    additional_scopes: &[String],
) -> Result<Plan, PlanningError> {
    PlanBuilder::new(working_dir)
        .with_scopes(additional_scopes)
        .build()
}

/// Reduce a scope string to an id-safe slug.
fn scope_slug(scope: &str) -> String {
    let mut slug = String::with_capacity(scope.len());
    let mut last_dash = false;
    for c in scope.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn test_build_plan_cargo_project() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Cargo.toml");
        fs::create_dir(dir.path().join("src")).unwrap();

        let plan = build_plan(dir.path(), &[]).unwrap();
        assert_eq!(plan.modules.len(), 2);

        let dep = &plan.modules[0];
        assert_eq!(dep.id, "dependency-upgrade");
        assert_eq!(dep.scope, vec!["Cargo.toml"]);
        assert_eq!(dep.codemod_commands, vec!["cargo update --dry-run"]);
        assert_eq!(dep.validation_commands, vec!["cargo test"]);

        let src = &plan.modules[1];
        assert_eq!(src.id, "source-modernization");
        assert_eq!(src.scope, vec!["src/"]);
        assert!(src.codemod_commands.is_empty());
    }

    #[test]
    fn test_build_plan_adds_test_hardening_when_tests_exist() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Cargo.toml");
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::create_dir(dir.path().join("tests")).unwrap();

        let plan = build_plan(dir.path(), &[]).unwrap();
        let ids: Vec<&str> = plan.modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["dependency-upgrade", "source-modernization", "test-hardening"]
        );
        assert_eq!(plan.modules[2].scope, vec!["tests/"]);
    }

    #[test]
    fn test_build_plan_multiple_ecosystems_ordered() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "package.json");
        touch(dir.path(), "Cargo.toml");

        let plan = build_plan(dir.path(), &[]).unwrap();
        let dep = &plan.modules[0];
        // Cargo always sorts before Node regardless of readdir order
        assert_eq!(dep.scope, vec!["Cargo.toml", "package.json"]);
        assert_eq!(
            dep.validation_commands,
            vec!["cargo test", "npm test --silent"]
        );
    }

    #[test]
    fn test_build_plan_unknown_ecosystem_falls_back() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "README.md");

        let plan = build_plan(dir.path(), &[]).unwrap();
        let dep = &plan.modules[0];
        assert_eq!(dep.scope, vec!["."]);
        assert!(dep.codemod_commands.is_empty());
        assert_eq!(dep.validation_commands, vec!["true"]);
        // No source dir detected either
        assert_eq!(plan.modules[1].scope, vec!["."]);
    }

    #[test]
    fn test_build_plan_additional_scopes_append_modules() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Cargo.toml");

        let scopes = vec!["crates/api".to_string(), "docs".to_string()];
        let plan = build_plan(dir.path(), &scopes).unwrap();
        let last_two: Vec<&str> = plan.modules[plan.modules.len() - 2..]
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(last_two, vec!["scope-crates-api", "scope-docs"]);
        assert_eq!(
            plan.modules[plan.modules.len() - 2].scope,
            vec!["crates/api"]
        );
        assert_eq!(
            plan.modules[plan.modules.len() - 2].label,
            "Scoped upgrade: crates/api"
        );
    }

    #[test]
    fn test_build_plan_is_deterministic() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Cargo.toml");
        touch(dir.path(), "package.json");
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::create_dir(dir.path().join("tests")).unwrap();

        let scopes = vec!["crates/core".to_string()];
        let a = build_plan(dir.path(), &scopes).unwrap();
        let b = build_plan(dir.path(), &scopes).unwrap();
        assert_eq!(a.modules, b.modules);
    }

    #[test]
    fn test_build_plan_missing_directory_is_planning_error() {
        let err = build_plan(Path::new("/definitely/not/here"), &[]).unwrap_err();
        assert!(matches!(err, PlanningError::NotADirectory { .. }));
    }

    #[test]
    fn test_every_module_has_modify_then_verify() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Cargo.toml");
        fs::create_dir(dir.path().join("tests")).unwrap();

        let plan = build_plan(dir.path(), &["x".to_string()]).unwrap();
        for module in &plan.modules {
            assert_eq!(module.steps.len(), 2, "module {}", module.id);
            assert_eq!(module.steps[0].intent, StepIntent::Modify);
            assert_eq!(module.steps[1].intent, StepIntent::Verify);
            assert_eq!(module.steps[0].id, format!("{}-modify", module.id));
            assert_eq!(module.steps[1].id, format!("{}-verify", module.id));
        }
        assert_eq!(plan.step_count(), plan.modules.len() * 2);
    }

    #[test]
    fn test_objective_folded_into_step_guidance() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Cargo.toml");

        let plan = PlanBuilder::new(dir.path())
            .with_objective(Some("migrate to edition 2024"))
            .build()
            .unwrap();
        for step in &plan.modules[0].steps {
            let prompt = step.prompt.as_deref().unwrap();
            assert!(prompt.contains("migrate to edition 2024"));
        }
    }

    #[test]
    fn test_scope_slug_normalizes() {
        assert_eq!(scope_slug("crates/api"), "crates-api");
        assert_eq!(scope_slug("Services//Auth "), "services-auth");
        assert_eq!(scope_slug("src"), "src");
    }
}
