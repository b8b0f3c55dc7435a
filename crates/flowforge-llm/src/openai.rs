// Flowforge LLM - OpenAI-compatible chat completions backend

use crate::{CompletionRequest, CompletionResponse, ModelProvider, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions provider; also serves OpenAI-compatible servers
/// via a custom base URL
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    model: String,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

impl OpenAiProvider {
    /// Provider reading its key from `OPENAI_API_KEY`
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::Auth("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client");
        Self {
            client,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = ChatRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(model = %request.model, "openai completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ProviderError::Auth(text),
                429 => ProviderError::RateLimited,
                400 => ProviderError::InvalidRequest(text),
                _ => ProviderError::Http(format!("{}: {}", status, text)),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("malformed response: {}", e)))?;

        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::Other("response contained no choices".to_string()))?;

        Ok(CompletionResponse {
            text,
            model: parsed.model,
            tokens_used: parsed.usage.map(|u| u.total_tokens),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
