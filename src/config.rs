use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default agent command. The prompt is written to its stdin; events are read
/// from its stdout as line-delimited JSON.
pub const DEFAULT_AGENT_CMD: &str = "claude -p --output-format stream-json --verbose";

/// Default per-step timeout (15 minutes).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 900;

/// Execution mode for a run.
///
/// | Mode         | Passes per step                               |
/// |--------------|-----------------------------------------------|
/// | `Standard`   | one `primary` pass                            |
/// | `Tournament` | a `primary` pass, then one `refiner` pass fed the primary's result |
///
/// `Standard` is the default. Whether a mode triggers a refiner pass is an
/// explicit table on this type ([`RunMode::runs_refiner`]), never inferred;
/// no mode runs more than one refiner pass per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Single primary pass per step (default)
    #[default]
    Standard,
    /// Primary pass followed by a refiner pass per step
    Tournament,
}

impl RunMode {
    /// Whether this mode runs a refiner pass after the primary pass.
    pub fn runs_refiner(&self) -> bool {
        match self {
            RunMode::Standard => false,
            RunMode::Tournament => true,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Standard => write!(f, "standard"),
            RunMode::Tournament => write!(f, "tournament"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(RunMode::Standard),
            "tournament" => Ok(RunMode::Tournament),
            _ => anyhow::bail!("Invalid run mode '{}'. Valid values: standard, tournament", s),
        }
    }
}

/// Policy for running a module's validation commands after its steps finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Run all eligible validations unconditionally (default)
    #[default]
    Auto,
    /// Gate each module's validations on an external confirmation
    Ask,
    /// Never run validations
    Skip,
}

impl std::fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationMode::Auto => write!(f, "auto"),
            ValidationMode::Ask => write!(f, "ask"),
            ValidationMode::Skip => write!(f, "skip"),
        }
    }
}

impl std::str::FromStr for ValidationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ValidationMode::Auto),
            "ask" => Ok(ValidationMode::Ask),
            "skip" => Ok(ValidationMode::Skip),
            _ => anyhow::bail!("Invalid validation mode '{}'. Valid values: auto, ask, skip", s),
        }
    }
}

/// Project-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (optional, defaults to directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Agent command (default: claude with stream-json output)
    #[serde(default)]
    pub agent_cmd: Option<String>,
}

/// Default run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Execution mode
    #[serde(default)]
    pub mode: RunMode,
    /// Validation policy
    #[serde(default)]
    pub validation: ValidationMode,
    /// Keep going after a module fails
    #[serde(default)]
    pub continue_on_failure: bool,
    /// Per-step timeout for the agent subprocess
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

fn default_step_timeout_secs() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            validation: ValidationMode::default(),
            continue_on_failure: false,
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

/// The complete refit.toml configuration structure.
///
/// Lives at `.refit/refit.toml` inside the working directory. All sections
/// are optional; CLI flags override file values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RefitToml {
    /// Project-level settings
    #[serde(default)]
    pub project: ProjectSection,
    /// Default run settings
    #[serde(default)]
    pub run: RunSection,
}

impl RefitToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse refit.toml")
    }

    /// Load configuration from the default location (`<refit_dir>/refit.toml`).
    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(refit_dir: &Path) -> Result<Self> {
        let config_path = refit_dir.join("refit.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the agent command, with fallback to environment variable.
    pub fn agent_cmd(&self) -> String {
        self.project
            .agent_cmd
            .clone()
            .or_else(|| std::env::var("REFIT_AGENT_CMD").ok())
            .unwrap_or_else(|| DEFAULT_AGENT_CMD.to_string())
    }
}

/// Get the `.refit` directory for a working directory.
pub fn get_refit_dir(working_dir: &Path) -> PathBuf {
    working_dir.join(".refit")
}

/// Resolved options for one upgrade run, after layering the config file and
/// CLI flags (CLI wins).
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory whose tree the run mutates and validates
    pub working_dir: PathBuf,
    /// Execution mode
    pub mode: RunMode,
    /// Proceed to the next module after a module fails
    pub continue_on_failure: bool,
    /// Extra scopes, each yielding one additional module
    pub additional_scopes: Vec<String>,
    /// Free-text objective folded into step guidance
    pub objective: Option<String>,
    /// Validation policy
    pub validation_mode: ValidationMode,
}

impl RunOptions {
    /// Create options with defaults for the given working directory.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            mode: RunMode::default(),
            continue_on_failure: false,
            additional_scopes: Vec::new(),
            objective: None,
            validation_mode: ValidationMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_run_mode_refiner_table() {
        assert!(!RunMode::Standard.runs_refiner());
        assert!(RunMode::Tournament.runs_refiner());
    }

    #[test]
    fn test_run_mode_from_str() {
        assert_eq!(RunMode::from_str("standard").unwrap(), RunMode::Standard);
        assert_eq!(RunMode::from_str("Tournament").unwrap(), RunMode::Tournament);
        assert!(RunMode::from_str("bogus").is_err());
    }

    #[test]
    fn test_validation_mode_from_str() {
        assert_eq!(ValidationMode::from_str("auto").unwrap(), ValidationMode::Auto);
        assert_eq!(ValidationMode::from_str("ASK").unwrap(), ValidationMode::Ask);
        assert_eq!(ValidationMode::from_str("skip").unwrap(), ValidationMode::Skip);
        assert!(ValidationMode::from_str("maybe").is_err());
    }

    #[test]
    fn test_mode_display_round_trips() {
        for mode in [RunMode::Standard, RunMode::Tournament] {
            assert_eq!(RunMode::from_str(&mode.to_string()).unwrap(), mode);
        }
        for mode in [ValidationMode::Auto, ValidationMode::Ask, ValidationMode::Skip] {
            assert_eq!(ValidationMode::from_str(&mode.to_string()).unwrap(), mode);
        }
    }

    #[test]
    fn test_refit_toml_defaults() {
        let toml = RefitToml::default();
        assert_eq!(toml.run.mode, RunMode::Standard);
        assert_eq!(toml.run.validation, ValidationMode::Auto);
        assert!(!toml.run.continue_on_failure);
        assert_eq!(toml.run.step_timeout_secs, DEFAULT_STEP_TIMEOUT_SECS);
        assert_eq!(toml.agent_cmd(), DEFAULT_AGENT_CMD);
    }

    #[test]
    fn test_refit_toml_parse() {
        let content = r#"
[project]
name = "my-service"
agent_cmd = "my-agent --json"

[run]
mode = "tournament"
validation = "ask"
continue_on_failure = true
step_timeout_secs = 120
"#;
        let toml = RefitToml::parse(content).unwrap();
        assert_eq!(toml.project.name.as_deref(), Some("my-service"));
        assert_eq!(toml.agent_cmd(), "my-agent --json");
        assert_eq!(toml.run.mode, RunMode::Tournament);
        assert_eq!(toml.run.validation, ValidationMode::Ask);
        assert!(toml.run.continue_on_failure);
        assert_eq!(toml.run.step_timeout_secs, 120);
    }

    #[test]
    fn test_refit_toml_partial_sections_use_defaults() {
        let content = r#"
[run]
mode = "tournament"
"#;
        let toml = RefitToml::parse(content).unwrap();
        assert_eq!(toml.run.mode, RunMode::Tournament);
        assert_eq!(toml.run.validation, ValidationMode::Auto);
        assert_eq!(toml.run.step_timeout_secs, DEFAULT_STEP_TIMEOUT_SECS);
    }

    #[test]
    fn test_refit_toml_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let toml = RefitToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.run.mode, RunMode::Standard);
    }

    #[test]
    fn test_refit_toml_load_or_default_with_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("refit.toml"), "[run]\nvalidation = \"skip\"\n").unwrap();
        let toml = RefitToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.run.validation, ValidationMode::Skip);
    }

    #[test]
    fn test_refit_toml_rejects_bad_mode() {
        let result = RefitToml::parse("[run]\nmode = \"chaotic\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_run_options_new_uses_defaults() {
        let options = RunOptions::new("/work/repo");
        assert_eq!(options.working_dir, PathBuf::from("/work/repo"));
        assert_eq!(options.mode, RunMode::Standard);
        assert!(!options.continue_on_failure);
        assert!(options.additional_scopes.is_empty());
        assert!(options.objective.is_none());
        assert_eq!(options.validation_mode, ValidationMode::Auto);
    }
}
