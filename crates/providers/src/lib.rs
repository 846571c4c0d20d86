//! Model client implementations for mindloop.
//!
//! All clients implement the `mindloop_core::ModelClient` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatClient;

use mindloop_config::ModelConfig;
use mindloop_core::{Error, ModelClient};
use std::sync::Arc;
use std::time::Duration;

/// Build the model client named by `config.provider`.
pub fn build_from_config(config: &ModelConfig) -> Result<Arc<dyn ModelClient>, Error> {
    match config.provider.as_str() {
        "openai_compat" | "openai" | "openrouter" | "ollama" => {
            let client = OpenAiCompatClient::new(
                config.provider.clone(),
                config.api_url.clone(),
                config.api_key.clone().unwrap_or_default(),
                config.model.clone(),
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Arc::new(client))
        }
        other => Err(Error::Config {
            message: format!("unknown model provider '{other}'"),
        }),
    }
}
