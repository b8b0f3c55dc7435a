// Flowforge LLM - Provider abstractions for the workflow engine
//
// The engine treats an LLM backend as an opaque `send prompt, get text`
// collaborator; it never parses a model's reply as code. Providers are
// selected by the model string prefix ("anthropic:...", "openai:...",
// "mock:...") through the registry.

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod registry;

pub use anthropic::AnthropicProvider;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A completion request sent to a model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model name without the provider prefix
    pub model: String,

    /// Fully resolved prompt text
    pub prompt: String,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Response token cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A completion returned by a model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text
    pub text: String,

    /// Model that produced the text
    pub model: String,

    /// Total tokens consumed, when the backend reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// Provider errors
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out")]
    Timeout,

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("provider error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => ProviderError::Auth(err.to_string()),
                429 => ProviderError::RateLimited,
                _ => ProviderError::Http(err.to_string()),
            }
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

/// An opaque LLM backend
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generate a completion
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// Provider name used as the model-string prefix
    fn name(&self) -> &str;
}
