//! Shell collaborator and per-module validation policy.
//!
//! Validation is the objective half of the pipeline: where step scoring only
//! inspects the agent's prose, this module actually runs the plan's
//! validation commands against the tree. Commands run sequentially because
//! later ones may depend on state left behind by earlier ones.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::config::ValidationMode;
use crate::errors::ValidationError;
use crate::plan::Module;
use crate::report::{ModuleReport, ModuleStatus, SkipReason, ValidationOutcome};

/// Captured-output ceiling per command. Output past this point is drained
/// but discarded so a runaway command cannot grow memory without bound.
pub const OUTPUT_CAP_BYTES: usize = 64 * 1024;

/// What a shell command produced on success.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes one shell command in a working directory.
///
/// Non-zero exit is an error carrying the captured streams, matching
/// ordinary subprocess semantics.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path) -> Result<ShellOutput, ValidationError>;
}

/// Grants or refuses permission to run a module's validations in ask mode.
#[async_trait]
pub trait ConfirmValidation: Send + Sync {
    async fn confirm(&self, module_id: &str, commands: &[String]) -> bool;
}

/// Real subprocess-backed `ShellRunner`.
pub struct ProcessShell;

#[async_trait]
impl ShellRunner for ProcessShell {
    async fn run(&self, command: &str, cwd: &Path) -> Result<ShellOutput, ValidationError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ValidationError::Spawn {
                command: command.to_string(),
                source,
            })?;

        // Read both pipes to EOF before reaping, so neither can fill up and
        // block the child.
        let (stdout_bytes, stderr_bytes) = tokio::join!(
            read_capped(child.stdout.take()),
            read_capped(child.stderr.take())
        );
        let stdout_bytes = stdout_bytes.map_err(|source| ValidationError::Io {
            command: command.to_string(),
            source,
        })?;
        let stderr_bytes = stderr_bytes.map_err(|source| ValidationError::Io {
            command: command.to_string(),
            source,
        })?;

        let status = child.wait().await.map_err(|source| ValidationError::Io {
            command: command.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

        if status.success() {
            Ok(ShellOutput { stdout, stderr })
        } else {
            Err(ValidationError::CommandFailed {
                stdout,
                stderr,
                message: format!(
                    "command exited with code {}",
                    status.code().unwrap_or(-1)
                ),
            })
        }
    }
}

/// Drain a pipe to EOF, keeping at most `OUTPUT_CAP_BYTES` of it.
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let Some(mut reader) = pipe else {
        return Ok(Vec::new());
    };
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if captured.len() < OUTPUT_CAP_BYTES {
            let take = n.min(OUTPUT_CAP_BYTES - captured.len());
            captured.extend_from_slice(&buf[..take]);
        }
    }
    Ok(captured)
}

/// Apply the validation policy for one module and produce its outcomes.
///
/// Skip mode never reaches this function (the flow coordinator
/// short-circuits it); the guard here only keeps a direct caller safe.
pub async fn run_validations_for_module(
    module_report: &ModuleReport,
    module: &Module,
    working_dir: &Path,
    mode: ValidationMode,
    shell: &dyn ShellRunner,
    confirm: Option<&dyn ConfirmValidation>,
) -> Vec<ValidationOutcome> {
    if mode == ValidationMode::Skip {
        return Vec::new();
    }

    let commands = &module.validation_commands;
    if commands.is_empty() {
        return Vec::new();
    }

    // Failed modules left the tree in an unknown state; treat them like
    // skipped ones and record why nothing ran.
    if module_report.status != ModuleStatus::Completed {
        return commands
            .iter()
            .map(|c| ValidationOutcome::skipped(c, SkipReason::ModuleSkipped))
            .collect();
    }

    if mode == ValidationMode::Ask {
        let approved = match confirm {
            Some(confirm) => confirm.confirm(&module.id, commands).await,
            None => false,
        };
        if !approved {
            return commands
                .iter()
                .map(|c| ValidationOutcome::skipped(c, SkipReason::ConfirmationRequired))
                .collect();
        }
    }

    let mut outcomes = Vec::with_capacity(commands.len());
    for command in commands {
        outcomes.push(run_one(shell, command, working_dir).await);
    }
    outcomes
}

async fn run_one(shell: &dyn ShellRunner, command: &str, working_dir: &Path) -> ValidationOutcome {
    let started = Instant::now();
    match shell.run(command, working_dir).await {
        Ok(output) => ValidationOutcome {
            command: command.to_string(),
            success: true,
            output: join_streams(&output.stdout, &output.stderr),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            skipped: false,
            reason: None,
        },
        Err(err) => {
            let output = match &err {
                ValidationError::CommandFailed { stdout, stderr, .. } => {
                    join_streams(stdout, stderr)
                }
                _ => String::new(),
            };
            ValidationOutcome {
                command: command.to_string(),
                success: false,
                output,
                error: Some(err.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
                skipped: false,
                reason: None,
            }
        }
    }
}

/// Combined stdout+stderr view: both streams trimmed, newline-joined.
fn join_streams(stdout: &str, stderr: &str) -> String {
    let mut parts = Vec::new();
    let out = stdout.trim();
    if !out.is_empty() {
        parts.push(out);
    }
    let err = stderr.trim();
    if !err.is_empty() {
        parts.push(err);
    }
    parts.join("\n")
}
