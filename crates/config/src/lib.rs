//! Configuration loading, validation, and management for mindloop.
//!
//! Loads configuration from `~/.mindloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use mindloop_core::RecallOrder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.mindloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model provider settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Reasoning engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Step retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-pattern tuning
    #[serde(default)]
    pub patterns: PatternsConfig,

    /// Memory and event storage
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider kind. Only `openai_compat` is built in.
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai_compat".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many memories are injected into each prompt
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    #[serde(default)]
    pub recall_order: RecallOrder,

    /// Text placed before the memories in every contextualized prompt
    #[serde(default = "default_context_preamble")]
    pub context_preamble: String,

    /// Instruction prefixed to the prior output when reflecting
    #[serde(default = "default_reflection_instruction")]
    pub reflection_instruction: String,
}

fn default_recall_limit() -> usize {
    5
}
fn default_context_preamble() -> String {
    "You are a careful reasoning agent. Use the relevant memories when they help.".into()
}
fn default_reflection_instruction() -> String {
    "Critique the following answer. Point out mistakes and gaps, then give an improved answer."
        .into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recall_limit: default_recall_limit(),
            recall_order: RecallOrder::default(),
            context_preamble: default_context_preamble(),
            reflection_instruction: default_reflection_instruction(),
        }
    }
}

/// What to do when a step's generation succeeded but its memory write failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistFailurePolicy {
    /// Keep the output, flag the step, continue.
    #[default]
    Proceed,
    /// Retry only the memory write under the retry policy.
    RetryStore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per step, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default)]
    pub on_memory_persist_failure: PersistFailurePolicy,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    5000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            on_memory_persist_failure: PersistFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternsConfig {
    #[serde(default)]
    pub sequential: SequentialConfig,

    #[serde(default)]
    pub parallel: ParallelConfig,

    #[serde(default)]
    pub planning: PlanningConfig,

    #[serde(default)]
    pub refinement: RefinementConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequentialConfig {
    /// Add a third step that merges reasoning and reflection
    #[serde(default)]
    pub compile_output: bool,
}

/// How parallel branch outputs are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationKind {
    #[default]
    LowestUncertainty,
    LabeledConcatenation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default = "default_branches")]
    pub branches: usize,

    #[serde(default)]
    pub combination: CombinationKind,
}

fn default_branches() -> usize {
    3
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            branches: default_branches(),
            combination: CombinationKind::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_steps() -> usize {
    10
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    #[serde(default = "default_rounds")]
    pub rounds: usize,
}

fn default_rounds() -> usize {
    3
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process-local, lost on exit.
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file. Defaults to `~/.mindloop/mindloop.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// The effective database path.
    pub fn db_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("mindloop.db"))
    }
}

impl AppConfig {
    /// Load configuration from the default location, then apply environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

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

    /// Apply `MINDLOOP_*` overrides using the given variable lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.model.api_key.is_none() {
            self.model.api_key = lookup("MINDLOOP_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("MINDLOOP_MODEL") {
            self.model.model = model;
        }
        if let Some(url) = lookup("MINDLOOP_API_URL") {
            self.model.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".mindloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        if self.patterns.parallel.branches == 0 {
            return Err(ConfigError::ValidationError(
                "patterns.parallel.branches must be at least 1".into(),
            ));
        }
        if self.patterns.planning.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "patterns.planning.max_steps must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for mindloop_core::Error {
    fn from(e: ConfigError) -> Self {
        mindloop_core::Error::Config {
            message: e.to_string(),
        }
    }
}
