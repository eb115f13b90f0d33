//! The background summarizer job. A separate LLM handle may be
//! configured for this role (the planner's reflection sub-loop draws the
//! same distinction for its critic); `rf-memory` only depends on this trait,
//! never on `rf-llm` directly, so a caller can wire any summarization
//! backend (or a deterministic test double) behind it.

use rf_core::ConversationTurn;

#[derive(Debug, Clone, thiserror::Error)]
#[error("summarization failed: {0}")]
pub struct SummarizeError(pub String);

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    /// Fold `turns` into `prior_summary`, returning the new prose summary.
    async fn summarize(&self, prior_summary: &str, turns: &[ConversationTurn]) -> Result<String, SummarizeError>;
}

/// A deterministic summarizer for tests: concatenates user messages.
/// Never fails — use [`FlakySummarizer`] below to exercise the failure
/// state machine.
pub struct ConcatSummarizer;

#[async_trait::async_trait]
impl Summarizer for ConcatSummarizer {
    async fn summarize(&self, prior_summary: &str, turns: &[ConversationTurn]) -> Result<String, SummarizeError> {
        let mut out = prior_summary.to_string();
        for t in turns {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&t.user_message);
        }
        Ok(out)
    }
}

/// A summarizer that fails its first `fail_times` calls, then succeeds —
/// used to exercise the `HEALTHY -> RETRY -> ... -> HEALTHY` path.
pub struct FlakySummarizer {
    pub fail_times: std::sync::atomic::AtomicU32,
}

impl FlakySummarizer {
    pub fn new(fail_times: u32) -> Self {
        Self { fail_times: std::sync::atomic::AtomicU32::new(fail_times) }
    }
}

#[async_trait::async_trait]
impl Summarizer for FlakySummarizer {
    async fn summarize(&self, prior_summary: &str, turns: &[ConversationTurn]) -> Result<String, SummarizeError> {
        let remaining = self.fail_times.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            return Err(SummarizeError("simulated failure".into()));
        }
        ConcatSummarizer.summarize(prior_summary, turns).await
    }
}

/// A summarizer that always fails — exercises the `DEGRADED` plateau.
pub struct AlwaysFailSummarizer;

#[async_trait::async_trait]
impl Summarizer for AlwaysFailSummarizer {
    async fn summarize(&self, _prior_summary: &str, _turns: &[ConversationTurn]) -> Result<String, SummarizeError> {
        Err(SummarizeError("always fails".into()))
    }
}
