//! Step execution: prompt construction, response folding, lexical scoring.
//!
//! `StepExecutor::execute` never fails at the signature level. Transport
//! errors, stream errors, and empty output all fold into a `StepResult`
//! with `success=false` or sentinel text, so the orchestrator can apply its
//! continue-on-failure policy over plain data.
//!
//! Scoring is deliberately crude: the agent's output is unstructured natural
//! language, so the executor only checks for lexical markers and defers real
//! verification to the validation runner.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Instant;

use crate::agent::{collect_response, AgentClient, AgentResponse};
use crate::config::RunMode;
use crate::plan::{Module, Step, StepIntent};

/// Character budget for `StepResult::summary`, including the `...` suffix.
pub const SUMMARY_MAX_CHARS: usize = 320;

/// Character budget for the previous-attempt summary embedded in refiner
/// prompts.
pub const PREVIOUS_SUMMARY_MAX_CHARS: usize = 240;

static PASS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bpass(ed)?\b").unwrap());
static VERIFIED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bverified?\b").unwrap());
static VERIFY_MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)test|verify|lint").unwrap());

/// Which attempt at a step this execution is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepVariant {
    /// First attempt
    Primary,
    /// Second attempt informed by the first
    Refiner,
}

impl std::fmt::Display for StepVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepVariant::Primary => write!(f, "primary"),
            StepVariant::Refiner => write!(f, "refiner"),
        }
    }
}

/// Everything one execution call needs. Lives only for that call.
pub struct StepExecutionInput<'a> {
    pub step: &'a Step,
    pub module: &'a Module,
    pub mode: RunMode,
    pub variant: StepVariant,
    /// Primary pass result, set only for refiner variants
    pub previous: Option<&'a StepResult>,
}

/// Execution record shaped like a shell execution so agent steps and
/// validation commands log uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Label, e.g. "agent:dependency-upgrade-modify:primary"
    pub command: String,
    pub output: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub variant: StepVariant,
    pub success: bool,
    /// Whitespace-collapsed, at most `SUMMARY_MAX_CHARS` chars, never empty
    pub summary: String,
    /// Full collected text, or the error text, never empty
    pub detail: String,
    /// Heuristic quality estimate in [0,1]; 0 exactly when failed
    pub score: f64,
    pub duration_ms: u64,
    pub execution: ExecutionRecord,
    pub notes: Vec<String>,
}

/// Bridges one planned step to the agent collaborator.
pub struct StepExecutor {
    agent: Arc<dyn AgentClient>,
}

impl StepExecutor {
    pub fn new(agent: Arc<dyn AgentClient>) -> Self {
        Self { agent }
    }

    /// Execute one step. All failures fold into the returned result.
    pub async fn execute(&self, input: StepExecutionInput<'_>) -> StepResult {
        let prompt = build_prompt(&input);

        let started = Instant::now();
        let response = match self.agent.send(&prompt).await {
            Ok(stream) => collect_response(stream).await,
            // Transport failure is treated exactly like an in-stream error
            Err(err) => AgentResponse {
                content: String::new(),
                error: Some(err.to_string()),
            },
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        assemble_result(&input, response, duration_ms)
    }
}

fn assemble_result(
    input: &StepExecutionInput<'_>,
    response: AgentResponse,
    duration_ms: u64,
) -> StepResult {
    let success = response.error.is_none();
    let error_text = response.error.clone().unwrap_or_default();

    // Summary prefers collected content; an error message stands in only
    // when the agent produced nothing.
    let source = if response.content.trim().is_empty() {
        error_text.as_str()
    } else {
        response.content.as_str()
    };
    let summary = summarize_result(source);
    let detail = if source.trim().is_empty() {
        "No output".to_string()
    } else {
        source.to_string()
    };

    let score = if success { score_output(&detail) } else { 0.0 };

    let mut notes = Vec::new();
    if !success {
        notes.push("Step failed".to_string());
    }
    if input.step.intent == StepIntent::Verify && !VERIFY_MENTION_RE.is_match(&summary) {
        notes.push("Verification step did not mention tests/lint".to_string());
    }

    StepResult {
        step_id: input.step.id.clone(),
        variant: input.variant,
        success,
        execution: ExecutionRecord {
            command: format!("agent:{}:{}", input.step.id, input.variant),
            output: detail.clone(),
            duration_ms,
            error: response.error,
        },
        summary,
        detail,
        score,
        duration_ms,
        notes,
    }
}

/// Collapse whitespace and truncate to the summary budget. Empty input maps
/// to the literal "No output".
pub fn summarize_result(text: &str) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "No output".to_string()
    } else {
        truncate_chars(&collapsed, SUMMARY_MAX_CHARS)
    }
}

/// Truncate to at most `max_chars` characters, `...` suffix included.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars - 3).collect();
        format!("{}...", head)
    }
}

/// Fixed lexical heuristic for successful steps: 0.6 base, +0.2 for a
/// pass/verified marker, +0.1 for mentioning tests or lint, capped at 1.0.
fn score_output(output: &str) -> f64 {
    let lowered = output.to_lowercase();
    let mut score: f64 = 0.6;
    if PASS_RE.is_match(&lowered) || VERIFIED_RE.is_match(&lowered) {
        score += 0.2;
    }
    if lowered.contains("test") || lowered.contains("lint") {
        score += 0.1;
    }
    score.min(1.0)
}

fn build_prompt(input: &StepExecutionInput<'_>) -> String {
    let mut prompt = format!(
        "You are performing a repository upgrade in {} mode.\n",
        input.mode
    );
    match input.variant {
        StepVariant::Primary => {
            prompt.push_str("This is the primary attempt at the step below.\n");
        }
        StepVariant::Refiner => {
            prompt.push_str(
                "This is a refiner pass: produce an improved, corrected version of the previous attempt.\n",
            );
        }
    }

    prompt.push_str(&format!(
        "\n## MODULE\n{} (scope: {})\n",
        input.module.label,
        input.module.scope.join(", ")
    ));
    prompt.push_str(&format!(
        "\n## STEP\n[{}] {}\n",
        input.step.intent, input.step.description
    ));
    if let Some(guidance) = &input.step.prompt {
        prompt.push_str(&format!("\n## GUIDANCE\n{}\n", guidance));
    }

    // Informational only: the validation runner decides what actually runs
    if !input.module.codemod_commands.is_empty() {
        prompt.push_str(&format!(
            "\n## SUGGESTED CODEMOD COMMANDS (informational)\n{}\n",
            input.module.codemod_commands.join("\n")
        ));
    }
    if !input.module.validation_commands.is_empty() {
        prompt.push_str(&format!(
            "\n## SUGGESTED VALIDATION COMMANDS (informational)\n{}\n",
            input.module.validation_commands.join("\n")
        ));
    }

    if input.variant == StepVariant::Refiner {
        if let Some(previous) = input.previous {
            if !previous.summary.is_empty() {
                prompt.push_str(&format!(
                    "\n## PREVIOUS ATTEMPT\n{}\n",
                    truncate_chars(&previous.summary, PREVIOUS_SUMMARY_MAX_CHARS)
                ));
            }
        }
    }

    prompt.push_str(
        "\n## REPORTING\nSummarize the work concisely, flag any remaining risk, and prefer commands and tests scoped to this module's paths.\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentEvent, AgentStream};
    use crate::errors::AgentError;
    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};
    use std::sync::Mutex;

    /// Agent double that replays a scripted event sequence and records every
    /// prompt it receives.
    struct ScriptedAgent {
        events: Vec<AgentEvent>,
        prompts: Mutex<Vec<String>>,
        fail_send: bool,
    }

    impl ScriptedAgent {
        fn new(events: Vec<AgentEvent>) -> Self {
            Self {
                events,
                prompts: Mutex::new(Vec::new()),
                fail_send: false,
            }
        }

        fn failing() -> Self {
            Self {
                events: Vec::new(),
                prompts: Mutex::new(Vec::new()),
                fail_send: true,
            }
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl AgentClient for ScriptedAgent {
        async fn send(&self, prompt: &str) -> Result<AgentStream, AgentError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail_send {
                return Err(AgentError::StdinUnavailable);
            }
            Ok(stream::iter(self.events.clone()).boxed())
        }
    }

    fn test_module() -> Module {
        Module {
            id: "dependency-upgrade".to_string(),
            label: "Dependency upgrade".to_string(),
            scope: vec!["Cargo.toml".to_string()],
            steps: vec![
                Step::new(
                    "dependency-upgrade-modify",
                    StepIntent::Modify,
                    "Upgrade outdated dependencies",
                ),
                Step::new(
                    "dependency-upgrade-verify",
                    StepIntent::Verify,
                    "Verify the changes",
                ),
            ],
            codemod_commands: vec!["cargo update --dry-run".to_string()],
            validation_commands: vec!["cargo test".to_string()],
        }
    }

    fn input_for<'a>(
        module: &'a Module,
        step: &'a Step,
        variant: StepVariant,
        previous: Option<&'a StepResult>,
    ) -> StepExecutionInput<'a> {
        StepExecutionInput {
            step,
            module,
            mode: RunMode::Standard,
            variant,
            previous,
        }
    }

    async fn run_step(agent: &ScriptedAgent, module: &Module, step_index: usize) -> StepResult {
        // Scripted agents are cheap; rebuild one behind an Arc per call
        let executor = StepExecutor::new(Arc::new(ScriptedAgent {
            events: agent.events.clone(),
            prompts: Mutex::new(Vec::new()),
            fail_send: agent.fail_send,
        }));
        let step = &module.steps[step_index];
        executor
            .execute(input_for(module, step, StepVariant::Primary, None))
            .await
    }

    // ==================== scoring ====================

    #[tokio::test]
    async fn test_successful_step_scores_with_lexical_heuristics() {
        let module = test_module();
        let agent = ScriptedAgent::new(vec![AgentEvent::MessageComplete {
            content: "All tests passed, verified".to_string(),
        }]);

        let result = run_step(&agent, &module, 0).await;

        assert!(result.success);
        assert!((result.score - 0.9).abs() < 1e-9, "score {}", result.score);
        assert_eq!(result.summary, "All tests passed, verified");
        assert_eq!(result.detail, "All tests passed, verified");
    }

    #[tokio::test]
    async fn test_score_base_without_markers() {
        let module = test_module();
        let agent = ScriptedAgent::new(vec![AgentEvent::MessageComplete {
            content: "Rewrote the manifest".to_string(),
        }]);

        let result = run_step(&agent, &module, 0).await;
        assert!((result.score - 0.6).abs() < 1e-9, "score {}", result.score);
    }

    #[test]
    fn test_score_stays_within_bounds() {
        for output in [
            "",
            "passed",
            "verified tests lint passed",
            "nothing relevant",
        ] {
            let score = score_output(output);
            assert!((0.0..=1.0).contains(&score), "score {} for {:?}", score, output);
        }
    }

    // ==================== failure folding ====================

    #[tokio::test]
    async fn test_stream_error_folds_into_failed_result() {
        let module = test_module();
        let agent = ScriptedAgent::new(vec![AgentEvent::Error {
            error: "connection reset".to_string(),
        }]);

        let result = run_step(&agent, &module, 0).await;

        assert!(!result.success);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.summary, "connection reset");
        assert_eq!(result.detail, "connection reset");
        assert!(result.notes.contains(&"Step failed".to_string()));
        assert_eq!(result.execution.error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_partial_content_survives_stream_error() {
        let module = test_module();
        let agent = ScriptedAgent::new(vec![
            AgentEvent::MessageDelta {
                content: "updated two crates".to_string(),
            },
            AgentEvent::Error {
                error: "connection reset".to_string(),
            },
        ]);

        let result = run_step(&agent, &module, 0).await;

        assert!(!result.success);
        assert_eq!(result.score, 0.0);
        // Content accumulated before the error wins the summary slot
        assert_eq!(result.summary, "updated two crates");
        assert_eq!(result.detail, "updated two crates");
    }

    #[tokio::test]
    async fn test_transport_failure_treated_like_stream_error() {
        let module = test_module();
        let agent = ScriptedAgent::failing();

        let result = run_step(&agent, &module, 0).await;

        assert!(!result.success);
        assert_eq!(result.score, 0.0);
        assert!(result.summary.contains("stdin unavailable"));
        assert!(result.notes.contains(&"Step failed".to_string()));
    }

    #[tokio::test]
    async fn test_empty_stream_yields_no_output_sentinel() {
        let module = test_module();
        let agent = ScriptedAgent::new(vec![]);

        let result = run_step(&agent, &module, 0).await;

        assert!(result.success);
        assert_eq!(result.summary, "No output");
        assert_eq!(result.detail, "No output");
        assert!((result.score - 0.6).abs() < 1e-9);
    }

    // ==================== notes ====================

    #[tokio::test]
    async fn test_verify_step_without_test_mention_gets_note() {
        let module = test_module();
        let agent = ScriptedAgent::new(vec![AgentEvent::MessageComplete {
            content: "looks good to me".to_string(),
        }]);

        let result = run_step(&agent, &module, 1).await;

        assert!(result.success);
        assert!(result
            .notes
            .contains(&"Verification step did not mention tests/lint".to_string()));
    }

    #[tokio::test]
    async fn test_verify_step_mentioning_tests_has_no_note() {
        let module = test_module();
        let agent = ScriptedAgent::new(vec![AgentEvent::MessageComplete {
            content: "Ran the test suite, everything green".to_string(),
        }]);

        let result = run_step(&agent, &module, 1).await;
        assert!(result.notes.is_empty());
    }

    // ==================== prompts ====================

    #[tokio::test]
    async fn test_prompt_carries_module_and_step_context() {
        let module = test_module();
        let agent = Arc::new(ScriptedAgent::new(vec![]));
        let executor = StepExecutor::new(agent.clone());

        executor
            .execute(input_for(
                &module,
                &module.steps[0],
                StepVariant::Primary,
                None,
            ))
            .await;

        let prompt = agent.last_prompt();
        assert!(prompt.contains("standard mode"));
        assert!(prompt.contains("primary attempt"));
        assert!(prompt.contains("Dependency upgrade"));
        assert!(prompt.contains("Cargo.toml"));
        assert!(prompt.contains("Upgrade outdated dependencies"));
        assert!(prompt.contains("cargo update --dry-run"));
        assert!(prompt.contains("cargo test"));
        assert!(prompt.contains("Summarize the work concisely"));
    }

    #[tokio::test]
    async fn test_refiner_prompt_embeds_previous_summary_truncated() {
        let module = test_module();
        let agent = Arc::new(ScriptedAgent::new(vec![]));
        let executor = StepExecutor::new(agent.clone());

        let long_summary = "a".repeat(300);
        let previous = StepResult {
            step_id: "dependency-upgrade-modify".to_string(),
            variant: StepVariant::Primary,
            success: true,
            summary: long_summary,
            detail: "detail".to_string(),
            score: 0.6,
            duration_ms: 1,
            execution: ExecutionRecord {
                command: "agent:dependency-upgrade-modify:primary".to_string(),
                output: "detail".to_string(),
                duration_ms: 1,
                error: None,
            },
            notes: vec![],
        };

        executor
            .execute(input_for(
                &module,
                &module.steps[0],
                StepVariant::Refiner,
                Some(&previous),
            ))
            .await;

        let prompt = agent.last_prompt();
        assert!(prompt.contains("refiner pass"));
        let embedded = format!("{}...", "a".repeat(PREVIOUS_SUMMARY_MAX_CHARS - 3));
        assert!(prompt.contains(&embedded));
        assert!(!prompt.contains(&"a".repeat(PREVIOUS_SUMMARY_MAX_CHARS + 1)));
    }

    #[tokio::test]
    async fn test_execution_record_labels_agent_call() {
        let module = test_module();
        let agent = ScriptedAgent::new(vec![]);

        let result = run_step(&agent, &module, 0).await;
        assert_eq!(
            result.execution.command,
            "agent:dependency-upgrade-modify:primary"
        );
        assert_eq!(result.execution.output, "No output");
    }

    // ==================== summarize_result law ====================

    #[test]
    fn test_summarize_collapses_whitespace() {
        assert_eq!(summarize_result("  a\n\n b\tc "), "a b c");
    }

    #[test]
    fn test_summarize_truncates_to_budget_with_suffix() {
        let long = "x".repeat(400);
        let summary = summarize_result(&long);
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);
        assert!(summary.ends_with("..."));
        assert!(summary.starts_with(&"x".repeat(SUMMARY_MAX_CHARS - 3)));
    }

    #[test]
    fn test_summarize_keeps_text_at_budget_unchanged() {
        let exact = "y".repeat(SUMMARY_MAX_CHARS);
        assert_eq!(summarize_result(&exact), exact);
    }

    #[test]
    fn test_summarize_empty_is_no_output() {
        assert_eq!(summarize_result(""), "No output");
        assert_eq!(summarize_result("   \n\t "), "No output");
    }
}
