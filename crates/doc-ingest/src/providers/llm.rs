//! LLM inference service abstraction

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// A chat completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Fully rendered user prompt
    pub prompt: String,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

/// Trait for the remote LLM used during ingestion and chat
///
/// Implementations:
/// - `VllmClient`: OpenAI-compatible vLLM server
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Send a batch of prompts and return one keep/drop decision per choice
    async fn classify(&self, prompts: &[String]) -> Result<Vec<bool>>;

    /// Plain completion of one prompt
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Streaming chat completion, yielding server-sent event lines
    async fn chat_stream(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<String>>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Result of a remote call with an explicit fallback policy
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The service answered
    Success(T),
    /// The service failed and the policy default was used
    Fallback { value: T, reason: String },
}

impl<T> Outcome<T> {
    /// Resolve a remote result, substituting `fallback` on error
    pub fn or_fallback<E: std::fmt::Display>(result: std::result::Result<T, E>, fallback: T) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Fallback {
                value: fallback,
                reason: e.to_string(),
            },
        }
    }

    /// The value regardless of how it was obtained
    pub fn value(&self) -> &T {
        match self {
            Self::Success(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Success(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}
