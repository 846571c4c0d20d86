//! Model client trait: the abstraction over text-generation backends.
//!
//! The engine only needs one operation: turn a fully contextualized prompt
//! into text. Failures are split into transient (`Unavailable`, retried by
//! the orchestrator) and terminal (`Rejected`).
//!
//! Implementations: OpenAI-compatible endpoints, scripted test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Per-request generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// The model to use (e.g., "gpt-4o-mini", "llama3.1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            max_tokens: None,
            stop: Vec::new(),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,

    #[serde(default)]
    pub usage: Usage,

    /// Model-reported uncertainty in `[0, 1]`, when the backend exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f32>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: Usage::default(),
            uncertainty: None,
            model: String::new(),
        }
    }
}

/// The core ModelClient trait.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<Generation, ModelError>;

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, ModelError> {
        Ok(true)
    }
}
