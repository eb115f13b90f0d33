//! Prompt assembly: base system prompt ⊕ optional memory block
//! ⊕ catalog ⊕ compressed trajectory. When the rendered trajectory exceeds
//! `token_budget`, the oldest steps are folded into a digest via the
//! summarizer LLM rather than discarded.

use rf_core::trajectory::{Outcome, Trajectory, TrajectoryStep};
use rf_llm::{CompletionRequest, LlmHandle, OutputMode, PromptMessage};
use rf_memory::TokenEstimator;

pub struct CompiledTrajectory {
    pub digest: Option<String>,
    pub recent_steps: Vec<TrajectoryStep>,
}

fn render_step(step: &TrajectoryStep) -> String {
    let action = serde_json::to_string(&step.action).unwrap_or_default();
    let outcome = match &step.outcome {
        Some(Outcome::Observation(v)) => format!("observation: {v}"),
        Some(Outcome::Error(e)) => format!("error[{:?}]: {}", e.code, e.message),
        None => "observation: (pending)".to_string(),
    };
    format!("step {}: thought={:?} action={action} {outcome}", step.index, step.thought)
}

pub fn render_trajectory(steps: &[TrajectoryStep]) -> String {
    steps.iter().map(render_step).collect::<Vec<_>>().join("\n")
}

/// Fold the oldest steps of `trajectory` into a digest once the full
/// rendering exceeds `token_budget`, keeping the most recent half verbatim.
pub async fn compress_trajectory(
    trajectory: &Trajectory,
    token_budget: u32,
    estimator: &dyn TokenEstimator,
    summarizer: Option<&dyn LlmHandle>,
) -> CompiledTrajectory {
    let steps = trajectory.steps();
    let full_rendering = render_trajectory(steps);
    if steps.len() <= 1 || estimator.estimate(&full_rendering) <= token_budget as usize {
        return CompiledTrajectory { digest: None, recent_steps: steps.to_vec() };
    }

    let keep = (steps.len() / 2).max(1);
    let (older, recent) = steps.split_at(steps.len() - keep);
    let older_rendering = render_trajectory(older);

    let digest = match summarizer {
        Some(llm) => {
            let prompt = format!(
                "Summarize these prior agent steps into a compact digest that preserves which tools ran and what they returned:\n\n{older_rendering}"
            );
            let req = CompletionRequest { output_mode: OutputMode::Prompted, ..CompletionRequest::new(vec![PromptMessage::user(prompt)]) };
            match llm.complete(req).await {
                Ok(resp) => resp.structured_output.and_then(|v| v.as_str().map(str::to_owned)).unwrap_or(older_rendering),
                Err(_) => older_rendering,
            }
        }
        None => older_rendering,
    };

    CompiledTrajectory { digest: Some(digest), recent_steps: recent.to_vec() }
}

/// Assemble the message list for one LLM call.
pub fn build_messages(
    system_prompt: &str,
    catalog_prompt: &str,
    memory_block: Option<&str>,
    goal: &str,
    compiled: &CompiledTrajectory,
) -> Vec<PromptMessage> {
    let mut system = String::new();
    system.push_str(system_prompt);
    system.push_str("\n\nAvailable tools:\n");
    system.push_str(catalog_prompt);
    if let Some(mem) = memory_block {
        system.push_str("\n\nConversation memory:\n");
        system.push_str(mem);
    }
    if let Some(digest) = &compiled.digest {
        system.push_str("\n\nEarlier trajectory (summarized):\n");
        system.push_str(digest);
    }

    let mut messages = vec![PromptMessage::system(system), PromptMessage::user(goal.to_owned())];
    if !compiled.recent_steps.is_empty() {
        messages.push(PromptMessage::assistant(render_trajectory(&compiled.recent_steps)));
    }
    messages
}
