//! Reflection sub-loop: a proposed `finish`
//! answer is scored by a critic LLM against `completeness`, `accuracy`, and
//! `clarity`; below `quality_threshold` with revisions remaining, the
//! critique is injected as an observation and the loop continues.

use rf_llm::{CompletionRequest, LlmError, LlmHandle, PromptMessage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    pub enabled: bool,
    pub quality_threshold: f64,
    pub max_revisions: u32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self { enabled: false, quality_threshold: 0.7, max_revisions: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionVerdict {
    pub score: f64,
    pub critique: String,
}

/// Ask `critic` to score `answer` against `goal`. `critic` may be a separate
/// LLM handle from the planner's main one, when configured that way.
pub async fn critique(critic: &dyn LlmHandle, goal: &str, answer: &str) -> Result<ReflectionVerdict, LlmError> {
    let prompt = format!(
        "Goal: {goal}\nProposed answer: {answer}\n\nScore the answer from 0.0 to 1.0 on completeness, accuracy, and clarity combined. Respond with JSON: {{\"score\": <number>, \"critique\": <string>}}."
    );
    let req = CompletionRequest::new(vec![PromptMessage::user(prompt)]);
    let resp = critic.complete(req).await?;
    let value = resp.structured_output.ok_or_else(|| LlmError::Parse("critic returned no structured output".into()))?;
    serde_json::from_value(value).map_err(|e| LlmError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_llm::testing::{ScriptedLlm, ScriptedStep};

    #[tokio::test]
    async fn parses_a_well_formed_verdict() {
        let critic = ScriptedLlm::new(vec![ScriptedStep::Respond(serde_json::json!({"score": 0.9, "critique": "solid"}))]);
        let verdict = critique(&critic, "goal", "answer").await.unwrap();
        assert_eq!(verdict.score, 0.9);
    }

    #[tokio::test]
    async fn malformed_verdict_is_a_parse_error() {
        let critic = ScriptedLlm::new(vec![ScriptedStep::Respond(serde_json::json!({"nonsense": true}))]);
        let err = critique(&critic, "goal", "answer").await.unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }
}
