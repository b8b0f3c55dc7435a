// Flowforge LLM - Scripted mock provider
//
// Deterministic backend for tests and dry runs: replies are served from a
// queue, falling back to echoing the prompt. Failures can be injected to
// exercise retry and circuit-breaker paths.

use crate::{CompletionRequest, CompletionResponse, ModelProvider, ProviderError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted mock provider
pub struct MockProvider {
    replies: Mutex<VecDeque<String>>,
    /// Number of initial calls that fail before replies are served
    failures_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Provider that echoes prompts back
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            failures_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue canned replies, served in order
    pub fn with_replies(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let provider = Self::new();
        {
            let mut queue = provider.replies.lock();
            queue.extend(replies.into_iter().map(Into::into));
        }
        provider
    }

    /// Fail the first `n` calls with a transient error
    pub fn failing_first(mut self, n: usize) -> Self {
        *self.failures_remaining.get_mut() = n;
        self
    }

    /// Calls observed so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Other("injected transient failure".to_string()));
        }

        let text = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("echo: {}", request.prompt));

        Ok(CompletionResponse {
            text,
            model: request.model,
            tokens_used: None,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_by_default() {
        let provider = MockProvider::new();
        let response = provider
            .complete(CompletionRequest::new("fake", "hello"))
            .await
            .unwrap();
        assert_eq!(response.text, "echo: hello");
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let provider = MockProvider::with_replies(["first", "second"]);
        let a = provider
            .complete(CompletionRequest::new("fake", "x"))
            .await
            .unwrap();
        let b = provider
            .complete(CompletionRequest::new("fake", "y"))
            .await
            .unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let provider = MockProvider::with_replies(["ok"]).failing_first(2);
        assert!(provider
            .complete(CompletionRequest::new("fake", "x"))
            .await
            .is_err());
        assert!(provider
            .complete(CompletionRequest::new("fake", "x"))
            .await
            .is_err());
        let response = provider
            .complete(CompletionRequest::new("fake", "x"))
            .await
            .unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(provider.call_count(), 3);
    }
}
