//! Agent collaborator contract and the CLI-backed implementation.
//!
//! The orchestration core talks to the agent through `AgentClient`, which
//! turns a prompt into an ordered stream of `AgentEvent`s. `CliAgent` is the
//! production implementation: it spawns the configured agent command through
//! the shell, writes the prompt to stdin, and parses stdout line by line.
//! Tests substitute scripted streams.

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use crate::errors::AgentError;

/// One event in an agent response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "message.delta")]
    MessageDelta {
        #[serde(default)]
        content: String,
    },

    #[serde(rename = "message.complete")]
    MessageComplete {
        #[serde(default)]
        content: String,
    },

    #[serde(rename = "error")]
    Error { error: String },
}

/// Ordered async sequence of agent events.
pub type AgentStream = BoxStream<'static, AgentEvent>;

/// Submits prompts to an agent and yields its response stream.
///
/// Transport-level failures (cannot spawn, cannot write the prompt) surface
/// as `AgentError`; failures reported by the agent itself arrive in-stream
/// as `AgentEvent::Error`.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn send(&self, prompt: &str) -> Result<AgentStream, AgentError>;
}

/// Everything a response stream folds down to.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    /// All delta/complete content, concatenated in delivery order
    pub content: String,
    /// First error reported by the stream, if any
    pub error: Option<String>,
}

/// Fold a response stream into accumulated content plus the first error.
///
/// Consumes the stream to completion. Content delivered after an error event
/// is still accumulated; only the first error message is kept.
pub async fn collect_response(mut stream: AgentStream) -> AgentResponse {
    let mut content = String::new();
    let mut error: Option<String> = None;

    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::MessageDelta { content: chunk }
            | AgentEvent::MessageComplete { content: chunk } => {
                content.push_str(&chunk);
            }
            AgentEvent::Error { error: message } => {
                if error.is_none() {
                    error = Some(message);
                }
            }
        }
    }

    AgentResponse { content, error }
}

/// Runs the agent as a shell subprocess speaking line-delimited JSON.
pub struct CliAgent {
    command: String,
    working_dir: PathBuf,
    step_timeout: Duration,
}

impl CliAgent {
    pub fn new(command: &str, working_dir: impl AsRef<Path>, step_timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            working_dir: working_dir.as_ref().to_path_buf(),
            step_timeout,
        }
    }
}

#[async_trait]
impl AgentClient for CliAgent {
    async fn send(&self, prompt: &str) -> Result<AgentStream, AgentError> {
        // Use the shell so configured commands can carry flags and pipes
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        // Write the prompt and close stdin so the agent sees EOF
        let mut stdin = child.stdin.take().ok_or(AgentError::StdinUnavailable)?;
        stdin
            .write_all(prompt.as_bytes())
            .await
            .map_err(|source| AgentError::Stdin { source })?;
        stdin
            .shutdown()
            .await
            .map_err(|source| AgentError::Stdin { source })?;

        let stdout = child.stdout.take().ok_or(AgentError::StdoutUnavailable)?;

        let (tx, rx) = mpsc::unbounded();
        let step_timeout = self.step_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(step_timeout, pump_events(child, stdout, &tx)).await {
                Ok(Ok(status)) => {
                    if !status.success() {
                        let code = status.code().unwrap_or(-1);
                        let _ = tx.unbounded_send(AgentEvent::Error {
                            error: format!("agent command exited with code {}", code),
                        });
                    }
                }
                Ok(Err(err)) => {
                    let _ = tx.unbounded_send(AgentEvent::Error {
                        error: format!("failed to read agent output: {}", err),
                    });
                }
                Err(_) => {
                    // Dropping the pump future kills the child (kill_on_drop)
                    let _ = tx.unbounded_send(AgentEvent::Error {
                        error: format!("agent timed out after {}s", step_timeout.as_secs()),
                    });
                }
            }
        });

        Ok(rx.boxed())
    }
}

/// Read stdout lines, translate them to events, and wait for exit.
async fn pump_events(
    mut child: Child,
    stdout: ChildStdout,
    tx: &UnboundedSender<AgentEvent>,
) -> std::io::Result<std::process::ExitStatus> {
    let mut translator = StreamTranslator::new();
    let mut lines = BufReader::new(stdout).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(event) = translator.translate(&line) {
            if tx.unbounded_send(event).is_err() {
                // Receiver dropped; stop reading and reap the child
                break;
            }
        }
    }

    child.wait().await
}

/// Translates one stdout line into at most one `AgentEvent`.
///
/// Accepts the native wire format directly, plus the Claude CLI's
/// `stream-json` format (assistant text becomes deltas, the final result
/// becomes a completion). The final result repeats text already streamed,
/// so it is dropped once any assistant text was seen. Unrecognized JSON is
/// ignored; plain text becomes a delta.
struct StreamTranslator {
    saw_text: bool,
}

impl StreamTranslator {
    fn new() -> Self {
        Self { saw_text: false }
    }

    fn translate(&mut self, line: &str) -> Option<AgentEvent> {
        if let Ok(event) = serde_json::from_str::<AgentEvent>(line) {
            if matches!(
                event,
                AgentEvent::MessageDelta { .. } | AgentEvent::MessageComplete { .. }
            ) {
                self.saw_text = true;
            }
            return Some(event);
        }

        if let Ok(event) = serde_json::from_str::<CliStreamEvent>(line) {
            return match event {
                CliStreamEvent::Assistant { message } => {
                    let text: Vec<String> = message
                        .content
                        .into_iter()
                        .filter_map(|block| match block {
                            CliContentBlock::Text { text } => Some(text),
                            CliContentBlock::Other => None,
                        })
                        .collect();
                    if text.is_empty() {
                        None
                    } else {
                        self.saw_text = true;
                        Some(AgentEvent::MessageDelta {
                            content: text.join("\n"),
                        })
                    }
                }
                CliStreamEvent::Result { result, is_error } => {
                    if is_error {
                        Some(AgentEvent::Error {
                            error: result
                                .unwrap_or_else(|| "agent reported an error".to_string()),
                        })
                    } else if self.saw_text {
                        None
                    } else {
                        result.map(|content| AgentEvent::MessageComplete { content })
                    }
                }
                CliStreamEvent::Other => None,
            };
        }

        if serde_json::from_str::<serde_json::Value>(line).is_ok() {
            return None;
        }

        self.saw_text = true;
        Some(AgentEvent::MessageDelta {
            content: line.to_string(),
        })
    }
}

/// Subset of the Claude CLI's stream-json events worth translating.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CliStreamEvent {
    #[serde(rename = "assistant")]
    Assistant { message: CliMessage },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct CliMessage {
    #[serde(default)]
    content: Vec<CliContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CliContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}
