// Flowforge LLM - Provider registry
//
// Routes "provider:model" strings to a registered backend. A bare model
// string with no prefix routes to the provider registered as the default.

use crate::{CompletionRequest, CompletionResponse, ModelProvider, ProviderError};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of model providers keyed by prefix
pub struct ProviderRegistry {
    providers: DashMap<String, Arc<dyn ModelProvider>>,
    default_provider: parking_lot::Mutex<Option<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            default_provider: parking_lot::Mutex::new(None),
        }
    }

    /// Register a provider under its own name; the first registration
    /// becomes the default
    pub fn register(&self, provider: Arc<dyn ModelProvider>) {
        let name = provider.name().to_string();
        let mut default = self.default_provider.lock();
        if default.is_none() {
            *default = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    /// Registered provider count
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Split "provider:model" into its parts
    fn route(&self, model: &str) -> Result<(Arc<dyn ModelProvider>, String), ProviderError> {
        if let Some((prefix, rest)) = model.split_once(':') {
            let provider = self
                .providers
                .get(prefix)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| ProviderError::UnknownModel(model.to_string()))?;
            return Ok((provider, rest.to_string()));
        }

        let default = self
            .default_provider
            .lock()
            .clone()
            .ok_or_else(|| ProviderError::UnknownModel(model.to_string()))?;
        let provider = self
            .providers
            .get(&default)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ProviderError::UnknownModel(model.to_string()))?;
        Ok((provider, model.to_string()))
    }

    /// Send a prompt to whichever provider the model string selects
    pub async fn complete(
        &self,
        model: &str,
        prompt: String,
    ) -> Result<CompletionResponse, ProviderError> {
        let (provider, model_name) = self.route(model)?;
        debug!(provider = provider.name(), model = %model_name, "dispatching completion");
        provider
            .complete(CompletionRequest::new(model_name, prompt))
            .await
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockProvider;

    #[tokio::test]
    async fn test_prefix_routing() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::with_replies(["routed"])));

        let response = registry
            .complete("mock:any-model", "hi".to_string())
            .await
            .unwrap();
        assert_eq!(response.text, "routed");
        assert_eq!(response.model, "any-model");
    }

    #[tokio::test]
    async fn test_default_provider_for_bare_model() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new()));

        let response = registry
            .complete("bare-model", "hello".to_string())
            .await
            .unwrap();
        assert_eq!(response.text, "echo: hello");
        assert_eq!(response.model, "bare-model");
    }

    #[tokio::test]
    async fn test_unknown_prefix() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new()));

        let err = registry
            .complete("martian:model-1", "hi".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        let err = registry.complete("anything", "hi".to_string()).await;
        assert!(err.is_err());
    }
}
