//! LLM integration for ticket classification.
//!
//! Supports:
//! - **OpenAI**: chat completions with JSON mode
//! - **Anthropic**: messages API
//!
//! Both are reached through `HttpProvider`, which implements `LlmProvider`.

mod costs;
pub mod http;
pub mod provider;

pub use http::HttpProvider;
pub use provider::*;

use std::sync::Arc;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    pub fn name(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Override for OpenAI-compatible gateways.
    pub base_url: Option<String>,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = HttpProvider::new(
        config.backend,
        config.api_key.clone(),
        config.model.clone(),
        config.base_url.clone(),
    )?;
    tracing::info!(
        "Using {} (model: {})",
        config.backend.name(),
        config.model
    );
    Ok(Arc::new(provider))
}
