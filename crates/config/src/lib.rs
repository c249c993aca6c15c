//! Configuration loading, validation, and management for Stepwise.
//!
//! Profiles live in `<workdir>/.stepwise/configs/*.toml`. Values the file
//! omits are filled from `STEPWISE_*` environment variables, then from
//! built-in defaults. CLI flags are applied on top by the caller.

pub mod workspace;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use workspace::{AgentHome, ConfigSource, resolve_config_path, select_config};

/// Model used when neither the file nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default action regex: exactly one fenced bash block.
pub const DEFAULT_ACTION_REGEX: &str = r"(?s)```bash\s*\n(.*?)\n```";

/// The root configuration structure.
///
/// Maps directly to a profile file such as `.stepwise/configs/live.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language model settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Local command environment settings
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// JSON Lines output settings
    #[serde(default)]
    pub headless: HeadlessConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// How cost computation failures are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTracking {
    /// A failed cost computation aborts the run.
    #[default]
    Default,
    /// A failed cost computation records 0.0 and the run continues.
    IgnoreErrors,
}

impl std::str::FromStr for CostTracking {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "ignore_errors" => Ok(Self::IgnoreErrors),
            other => Err(ConfigError::ValidationError(format!(
                "cost_tracking must be 'default' or 'ignore_errors', got '{other}'"
            ))),
        }
    }
}

/// Per-million-token price override for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceOverride {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

/// Request parameters passed through to the completion endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelKwargs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Any other request field, forwarded verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `"<provider>/<model>"` or a bare model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    #[serde(default)]
    pub model_kwargs: ModelKwargs,

    /// JSON file with extra per-token model prices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_registry: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_tracking: Option<CostTracking>,

    /// Custom endpoint, sent to verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Request timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub pricing: HashMap<String, PriceOverride>,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("model_name", &self.model_name)
            .field("model_kwargs", &self.model_kwargs)
            .field("model_registry", &self.model_registry)
            .field("cost_tracking", &self.cost_tracking)
            .field("api_base", &self.api_base)
            .field("api_key", &redact(&self.api_key))
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("pricing", &self.pricing)
            .finish()
    }
}

impl ModelConfig {
    pub fn model_name(&self) -> &str {
        self.model_name.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn cost_tracking(&self) -> CostTracking {
        self.cost_tracking.unwrap_or_default()
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.unwrap_or(120)
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.unwrap_or(10)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Working directory for commands; the process cwd when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Per-command timeout in seconds
    #[serde(default = "default_env_timeout")]
    pub timeout: u64,

    /// Extra environment variables for every command
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

fn default_env_timeout() -> u64 {
    120
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            cwd: None,
            timeout: default_env_timeout(),
            env: HashMap::new(),
        }
    }
}

/// Whether actions wait for confirmation.
///
/// Only meaningful for an interactive front end. Headless runs always
/// execute without asking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    #[default]
    Confirm,
    Yolo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub mode: AgentMode,

    /// Maximum steps; 0 disables the limit
    #[serde(default)]
    pub step_limit: u32,

    /// Maximum cost in USD; 0 disables the limit
    #[serde(default = "default_cost_limit")]
    pub cost_limit: f64,

    #[serde(default = "default_action_regex")]
    pub action_regex: String,

    /// Treat environment failures other than timeouts as fatal
    #[serde(default)]
    pub environment_errors_fatal: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_observation_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_error_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_template: Option<String>,
}

fn default_cost_limit() -> f64 {
    3.0
}
fn default_action_regex() -> String {
    DEFAULT_ACTION_REGEX.into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::default(),
            step_limit: 0,
            cost_limit: default_cost_limit(),
            action_regex: default_action_regex(),
            environment_errors_fatal: false,
            system_template: None,
            instance_template: None,
            action_observation_template: None,
            format_error_template: None,
            timeout_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlessConfig {
    #[serde(default = "default_true")]
    pub include_timestamps: bool,

    /// Step output longer than this many characters is truncated
    #[serde(default = "default_max_output_length")]
    pub max_output_length: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_output_length() -> usize {
    10_000
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            include_timestamps: true,
            max_output_length: default_max_output_length(),
        }
    }
}

/// Profile written by `stepwise init`.
const DEFAULT_LIVE_PROFILE: &str = r#"# Stepwise live profile
# Generated on first run. Edit as needed.
#
# Usage:
#   stepwise run --profile live --task "Fix the bug"
#
# Environment variables fill any value left out here:
#   STEPWISE_MODEL, STEPWISE_API_BASE, STEPWISE_API_KEY,
#   STEPWISE_API_VERSION, STEPWISE_API_TIMEOUT, STEPWISE_COST_TRACKING

[model]
model_name = "gpt-4o"
cost_tracking = "ignore_errors"

[model.model_kwargs]
temperature = 0.0
max_tokens = 4096

[environment]
cwd = "."
timeout = 120

[agent]
mode = "confirm"
step_limit = 50
cost_limit = 5.0

[headless]
include_timestamps = true
max_output_length = 10000
"#;

impl AppConfig {
    /// Fallback used when no profile can be found.
    pub fn safe_mode() -> Self {
        let mut config = Self::default();
        config.model.model_name = Some(DEFAULT_MODEL.into());
        config.model.cost_tracking = Some(CostTracking::IgnoreErrors);
        config.environment.timeout = 60;
        config.agent.mode = AgentMode::Confirm;
        config.agent.cost_limit = 1.0;
        config.agent.step_limit = 20;
        config
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "Reading configuration file");

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Fill omitted values from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Fill omitted values from `lookup`. Values already set are kept.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model = &mut self.model;

        fill(&mut model.model_name, lookup("STEPWISE_MODEL"));
        fill(&mut model.api_base, lookup("STEPWISE_API_BASE"));
        fill(&mut model.api_key, lookup("STEPWISE_API_KEY"));
        fill(&mut model.api_version, lookup("STEPWISE_API_VERSION"));
        fill(
            &mut model.model_registry,
            lookup("STEPWISE_MODEL_REGISTRY").map(PathBuf::from),
        );

        if model.timeout.is_none() {
            if let Some(raw) = lookup("STEPWISE_API_TIMEOUT") {
                model.timeout = Some(parse_env("STEPWISE_API_TIMEOUT", &raw)?);
            }
        }
        if model.retry_attempts.is_none() {
            if let Some(raw) = lookup("STEPWISE_MODEL_RETRY_ATTEMPTS") {
                model.retry_attempts = Some(parse_env("STEPWISE_MODEL_RETRY_ATTEMPTS", &raw)?);
            }
        }
        if model.cost_tracking.is_none() {
            if let Some(raw) = lookup("STEPWISE_COST_TRACKING") {
                model.cost_tracking = Some(raw.trim().parse()?);
            }
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.model.model_kwargs.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(
                    "model.model_kwargs.temperature must be between 0.0 and 2.0".into(),
                ));
            }
        }

        if self.model.retry_attempts == Some(0) {
            return Err(ConfigError::ValidationError(
                "model.retry_attempts must be >= 1".into(),
            ));
        }

        if self.model.model_name().trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model.model_name must not be empty".into(),
            ));
        }

        if !self.agent.cost_limit.is_finite() || self.agent.cost_limit < 0.0 {
            return Err(ConfigError::ValidationError(
                "agent.cost_limit must be >= 0".into(),
            ));
        }

        if let Err(e) = regex_lite::Regex::new(&self.agent.action_regex) {
            return Err(ConfigError::ValidationError(format!(
                "agent.action_regex is invalid: {e}"
            )));
        }

        for (name, price) in &self.model.pricing {
            if price.input_per_m < 0.0 || price.output_per_m < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "model.pricing.\"{name}\" prices must be >= 0"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available.
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
    }

    /// Effective configuration as TOML, with secrets redacted.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.model.api_key.is_some() {
            shown.model.api_key = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&shown).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// The profile TOML written by `stepwise init`.
    pub fn default_toml() -> &'static str {
        DEFAULT_LIVE_PROFILE
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has an invalid value: '{raw}'")))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config not found: {spec}\nSearched locations:\n{}", format_searched(.searched))]
    NotFound { spec: String, searched: Vec<PathBuf> },

    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to prepare agent home at {path}: {reason}")]
    HomeError { path: PathBuf, reason: String },
}

fn format_searched(searched: &[PathBuf]) -> String {
    searched
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.model_name(), DEFAULT_MODEL);
        assert_eq!(config.model.retry_attempts(), 10);
        assert_eq!(config.model.timeout_secs(), 120);
        assert_eq!(config.environment.timeout, 120);
        assert_eq!(config.headless.max_output_length, 10_000);
        assert!(config.headless.include_timestamps);
    }

    #[test]
    fn safe_mode_values() {
        let config = AppConfig::safe_mode();
        assert_eq!(config.model.model_name(), "gpt-4o-mini");
        assert_eq!(config.model.cost_tracking(), CostTracking::IgnoreErrors);
        assert_eq!(config.environment.timeout, 60);
        assert_eq!(config.agent.mode, AgentMode::Confirm);
        assert_eq!(config.agent.cost_limit, 1.0);
        assert_eq!(config.agent.step_limit, 20);
    }

    #[test]
    fn default_profile_parses() {
        let config: AppConfig = toml::from_str(AppConfig::default_toml()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.model_name(), "gpt-4o");
        assert_eq!(config.model.model_kwargs.max_tokens, Some(4096));
        assert_eq!(config.agent.step_limit, 50);
        assert_eq!(config.agent.cost_limit, 5.0);
    }

    #[test]
    fn model_kwargs_keep_unknown_fields() {
        let toml_str = r#"
[model]
model_name = "openai/gpt-4o"

[model.model_kwargs]
temperature = 0.2
top_p = 0.9
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.model_kwargs.temperature, Some(0.2));
        assert_eq!(config.model.model_kwargs.extra["top_p"], 0.9);
    }

    #[test]
    fn env_fills_omitted_values_only() {
        let mut config = AppConfig::default();
        config.model.api_base = Some("http://from-file".into());

        config
            .apply_env_from(env_of(&[
                ("STEPWISE_API_BASE", "http://from-env"),
                ("STEPWISE_API_KEY", "sk-env"),
                ("STEPWISE_API_TIMEOUT", "30"),
                ("STEPWISE_COST_TRACKING", "ignore_errors"),
                ("STEPWISE_MODEL_RETRY_ATTEMPTS", "3"),
            ]))
            .unwrap();

        assert_eq!(config.model.api_base.as_deref(), Some("http://from-file"));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.model.timeout_secs(), 30);
        assert_eq!(config.model.retry_attempts(), 3);
        assert_eq!(config.model.cost_tracking(), CostTracking::IgnoreErrors);
    }

    #[test]
    fn bad_env_values_rejected() {
        let mut config = AppConfig::default();
        assert!(
            config
                .apply_env_from(env_of(&[("STEPWISE_API_TIMEOUT", "soon")]))
                .is_err()
        );

        let mut config = AppConfig::default();
        assert!(
            config
                .apply_env_from(env_of(&[("STEPWISE_COST_TRACKING", "sometimes")]))
                .is_err()
        );
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.model.model_kwargs.temperature = Some(5.0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.retry_attempts = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.agent.cost_limit = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.agent.action_regex = "(unclosed".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_cost_tracking_fails_to_parse() {
        let toml_str = "[model]\ncost_tracking = \"sometimes\"\n";
        assert!(toml::from_str::<AppConfig>(toml_str).is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));

        let shown = config.to_redacted_toml().unwrap();
        assert!(!shown.contains("sk-very-secret"));
    }

    #[test]
    fn pricing_overrides_parse() {
        let toml_str = r#"
[model.pricing."local/qwen"]
input_per_m = 0.5
output_per_m = 1.5
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.pricing["local/qwen"].output_per_m, 1.5);
    }

    #[test]
    fn load_from_missing_file_errors() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[agent\nstep_limit = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
