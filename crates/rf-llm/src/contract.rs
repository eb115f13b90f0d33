//! Provider-agnostic request/response types and the [`LlmHandle`] trait.

use std::pin::Pin;

use rf_core::StreamingChunk;
use serde::{Deserialize, Serialize};

/// A boxed async stream of chunks, used when `stream: true` is requested.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Structured-output negotiation mode: `JsonSchema` is tried first,
/// then `JsonObject`, then `Prompted`. On a non-retryable structured-output
/// failure the planner downgrades exactly one level per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    JsonSchema,
    JsonObject,
    Prompted,
}

impl OutputMode {
    /// The next weaker mode to retry with, or `None` if already at the floor.
    pub fn downgrade(self) -> Option<OutputMode> {
        match self {
            OutputMode::JsonSchema => Some(OutputMode::JsonObject),
            OutputMode::JsonObject => Some(OutputMode::Prompted),
            OutputMode::Prompted => None,
        }
    }
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The error taxonomy surfaced to the planner by an LLM handle.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("context length exceeded")]
    ContextLength,
    #[error("rate limited")]
    RateLimit,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("auth failure")]
    Auth,
    #[error("timed out")]
    Timeout,
    #[error("could not parse structured output: {0}")]
    Parse(String),
}

impl LlmError {
    /// Whether the planner may retry this call at all (possibly after
    /// downgrading `OutputMode` or compressing the trajectory).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::Auth)
    }
}

/// A single `complete` request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    /// JSON Schema the structured output must conform to, if any.
    pub schema: Option<serde_json::Value>,
    pub output_mode: OutputMode,
    pub stream: bool,
    pub model: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<PromptMessage>) -> Self {
        Self {
            messages,
            schema: None,
            output_mode: OutputMode::JsonSchema,
            stream: false,
            model: None,
        }
    }
}

/// The `complete` response: `{structured_output, chunks*, usage}`.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub structured_output: Option<serde_json::Value>,
    pub chunks: Vec<StreamingChunk>,
    pub usage: Option<Usage>,
}

/// The single operation the planner consumes from an LLM.
#[async_trait::async_trait]
pub trait LlmHandle: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_order() {
        assert_eq!(OutputMode::JsonSchema.downgrade(), Some(OutputMode::JsonObject));
        assert_eq!(OutputMode::JsonObject.downgrade(), Some(OutputMode::Prompted));
        assert_eq!(OutputMode::Prompted.downgrade(), None);
    }

    #[test]
    fn auth_errors_are_not_retryable() {
        assert!(!LlmError::Auth.is_retryable());
        assert!(LlmError::RateLimit.is_retryable());
    }
}
