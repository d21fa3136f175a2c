//! Typed error hierarchy for the refit orchestrator.
//!
//! Three enums cover the three failure domains:
//! - `PlanningError`: structural problems building the module plan; fatal
//! - `AgentError`: agent subprocess submission failures; folded into step results
//! - `ValidationError`: shell command failures; folded into validation outcomes
//!
//! Only planning errors (and genuinely unexpected I/O) escape to the caller;
//! step and validation failures travel as data so the orchestrator can apply
//! its continue-on-failure policy.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while deriving the upgrade plan from a working directory.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("working directory {path} does not exist or is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("failed to read working directory {path}: {source}")]
    UnreadableDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised when submitting a prompt to the agent collaborator.
///
/// These cover transport-level failures only. Errors reported *inside* the
/// agent's event stream arrive as `AgentEvent::Error` and never surface here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent process stdin unavailable")]
    StdinUnavailable,

    #[error("agent process stdout unavailable")]
    StdoutUnavailable,

    #[error("failed to write prompt to agent stdin: {source}")]
    Stdin {
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the shell collaborator when running a validation command.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The command ran but exited non-zero. Carries whatever output was
    /// captured so the caller can fold it into the validation record.
    #[error("{message}")]
    CommandFailed {
        stdout: String,
        stderr: String,
        message: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
