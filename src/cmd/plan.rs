//! Plan inspection, `refit plan`: build the plan and print it without
//! executing anything.

use anyhow::{Context, Result};
use refit::plan::{Plan, PlanBuilder};
use std::path::PathBuf;

pub fn cmd_plan(working_dir: PathBuf, scopes: &[String], json: bool) -> Result<()> {
    let working_dir = working_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve working directory: {}", working_dir.display()))?;

    let plan = PlanBuilder::new(&working_dir).with_scopes(scopes).build()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", render_plan(&plan));
    }

    Ok(())
}

/// Human-readable rendering of a plan.
///
/// This is pure logic that can be unit-tested without external processes.
pub fn render_plan(plan: &Plan) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}",
        console::style("Upgrade plan for").bold(),
        plan.working_dir.display()
    );

    for module in &plan.modules {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} {}",
            console::style(&module.id).yellow().bold(),
            console::style(format!("(scope: {})", module.scope.join(", "))).dim()
        );
        for step in &module.steps {
            let _ = writeln!(out, "  [{}] {}: {}", step.intent, step.id, step.description);
        }
        if !module.codemod_commands.is_empty() {
            let _ = writeln!(out, "  codemods:    {}", module.codemod_commands.join("; "));
        }
        if !module.validation_commands.is_empty() {
            let _ = writeln!(out, "  validations: {}", module.validation_commands.join("; "));
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} module(s), {} step(s)",
        plan.modules.len(),
        plan.step_count()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cargo_plan() -> Plan {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").expect("write");
        std::fs::create_dir(dir.path().join("src")).expect("mkdir");
        PlanBuilder::new(dir.path()).build().expect("plan builds")
    }

    // ── render_plan ───────────────────────────────────────────────────────────

    #[test]
    fn render_plan_lists_every_module_and_step() {
        let plan = cargo_plan();
        let rendered = render_plan(&plan);
        for module in &plan.modules {
            assert!(rendered.contains(&module.id), "missing module: {}", module.id);
            for step in &module.steps {
                assert!(rendered.contains(&step.id), "missing step: {}", step.id);
            }
        }
    }

    #[test]
    fn render_plan_shows_suggested_commands() {
        let plan = cargo_plan();
        let rendered = render_plan(&plan);
        assert!(rendered.contains("cargo update --dry-run"), "rendered:\n{rendered}");
        assert!(rendered.contains("cargo test"), "rendered:\n{rendered}");
    }

    #[test]
    fn render_plan_ends_with_totals_line() {
        let plan = cargo_plan();
        let rendered = render_plan(&plan);
        let expected = format!("{} module(s), {} step(s)", plan.modules.len(), plan.step_count());
        assert!(rendered.trim_end().ends_with(&expected), "rendered:\n{rendered}");
    }

    #[test]
    fn plan_serializes_for_json_output() {
        let plan = cargo_plan();
        let json = serde_json::to_string_pretty(&plan).expect("serializes");
        assert!(json.contains("dependency-upgrade"), "json:\n{json}");
        assert!(json.contains("\"modules\""), "json:\n{json}");
    }
}
