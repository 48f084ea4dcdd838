use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A single message in a completion exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// LLM completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// LLM completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Error type for LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
}

/// Trait for reasoning backends (OpenAI, Claude, Gemini, local servers, ...).
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>>;
}

/// Mock provider for testing: returns a fixed response, optionally after a delay or as an error.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub response: String,
    pub delay: Option<Duration>,
    pub fail_with: Option<String>,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            delay: None,
            fail_with: None,
        }
    }

    /// Respond only after `delay` has elapsed (used to exercise worker timeouts).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A provider whose every call fails as unavailable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            response: String::new(),
            delay: None,
            fail_with: Some(reason.into()),
        }
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>> {
        let content = self.response.clone();
        let delay = self.delay;
        let fail = self.fail_with.clone();
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if let Some(reason) = fail {
                return Err(LlmError::Unavailable(reason));
            }
            Ok(CompletionResponse {
                content,
                input_tokens: 10,
                output_tokens: 20,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 100,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn mock_provider_returns_response() {
        let mock = MockProvider::new("DECISION: respond");
        let resp = mock.complete(request()).await.unwrap();
        assert_eq!(resp.content, "DECISION: respond");
    }

    #[tokio::test]
    async fn unavailable_mock_fails() {
        let mock = MockProvider::unavailable("offline");
        let err = mock.complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(ref r) if r == "offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_mock_waits() {
        let mock = MockProvider::new("late").with_delay(Duration::from_secs(3));
        let start = tokio::time::Instant::now();
        let resp = mock.complete(request()).await.unwrap();
        assert_eq!(resp.content, "late");
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
