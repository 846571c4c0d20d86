//! OpenAI-compatible model client.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/v1/chat/completions`.
//!
//! Transport failures, timeouts, 408, 429 and 5xx map to
//! `ModelError::Unavailable` (retried upstream). Any other non-success
//! status is a terminal `ModelError::Rejected`.

use async_trait::async_trait;
use mindloop_core::error::ModelError;
use mindloop_core::model::{Generation, GenerationParams, ModelClient, Usage};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// An OpenAI-compatible model client.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
    request_logprobs: bool,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a new client.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            request_logprobs: false,
            client,
        })
    }

    /// Create an Ollama client (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Result<Self, ModelError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            model,
            Duration::from_secs(120),
        )
    }

    /// Ask the endpoint for token logprobs and derive `Generation::uncertainty`
    /// from them.
    pub fn with_logprobs(mut self, enabled: bool) -> Self {
        self.request_logprobs = enabled;
        self
    }

    fn request_body(&self, prompt: &str, params: &GenerationParams) -> serde_json::Value {
        let model = params.model.as_deref().unwrap_or(&self.default_model);
        let mut body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": params.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !params.stop.is_empty() {
            body["stop"] = serde_json::json!(params.stop);
        }
        if self.request_logprobs {
            body["logprobs"] = serde_json::json!(true);
        }
        body
    }
}

/// Map a non-success HTTP status to a model error.
fn classify_status(status: u16, body: String) -> ModelError {
    match status {
        408 | 429 | 500..=599 => ModelError::Unavailable(format!("HTTP {status}: {body}")),
        _ => ModelError::Rejected(format!("HTTP {status}: {body}")),
    }
}

/// `1 - exp(mean logprob)`, clamped to `[0, 1]`.
fn uncertainty_from_logprobs(logprobs: &[f64]) -> Option<f32> {
    if logprobs.is_empty() {
        return None;
    }
    let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
    Some((1.0 - mean.exp()).clamp(0.0, 1.0) as f32)
}

fn parse_response(api: ApiResponse) -> Result<Generation, ModelError> {
    let choice = api
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Unavailable("No choices in response".into()))?;

    let logprobs: Vec<f64> = choice
        .logprobs
        .and_then(|l| l.content)
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.logprob)
        .collect();

    let usage = api
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(Generation {
        text: choice.message.content.unwrap_or_default(),
        usage,
        uncertainty: uncertainty_from_logprobs(&logprobs),
        model: api.model,
    })
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<Generation, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(prompt, params);

        debug!(client = %self.name, model = %body["model"], "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Model endpoint returned error");
            return Err(classify_status(status, error_body));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Unavailable(format!("Failed to parse response: {e}")))?;

        parse_response(api_response)
    }

    async fn health_check(&self) -> std::result::Result<bool, ModelError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    logprobs: Option<ApiLogprobs>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiLogprobs {
    content: Option<Vec<ApiTokenLogprob>>,
}

#[derive(Debug, Deserialize)]
struct ApiTokenLogprob {
    logprob: f64,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
