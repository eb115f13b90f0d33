//! The planner's trajectory: an append-only log of `{thought, action,
//! observation|error}` steps, and the tagged `Action` variant it dispatches.
//!
//! This is a genuine sum type parsed once at the LLM boundary — never an
//! untyped map carried past that point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::FlowError;

/// A single tool invocation request inside a `parallel` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub args: serde_json::Value,
}

/// The structured action the LLM returns on each planner iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Finish {
        answer: String,
        #[serde(default)]
        artifacts: Vec<String>,
    },
    Call {
        tool_name: String,
        args: serde_json::Value,
    },
    Parallel {
        calls: Vec<ToolCall>,
        #[serde(default)]
        join_tool: Option<String>,
    },
    Clarify {
        question: String,
    },
}

/// The outcome of dispatching one `Action` — either a successful observation
/// or a classified error, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outcome {
    Observation(serde_json::Value),
    Error(FlowError),
}

/// One entry in the append-only trajectory.
///
/// Never mutated after construction; the planner loop only ever appends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub index: u64,
    pub thought: Option<String>,
    pub action: Action,
    pub outcome: Option<Outcome>,
    pub latency_ms: u64,
    pub artifacts: Vec<String>,
    pub tool_name: Option<String>,
}

impl TrajectoryStep {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Error(_)))
    }
}

/// The per-run, strictly-ordered trajectory log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    steps: Vec<TrajectoryStep>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a step; the index is assigned here so callers can never
    /// supply an out-of-order index.
    pub fn push(
        &mut self,
        thought: Option<String>,
        action: Action,
        outcome: Option<Outcome>,
        latency_ms: u64,
        artifacts: Vec<String>,
        tool_name: Option<String>,
    ) -> &TrajectoryStep {
        let index = self.steps.len() as u64;
        self.steps.push(TrajectoryStep {
            index,
            thought,
            action,
            outcome,
            latency_ms,
            artifacts,
            tool_name,
        });
        self.steps.last().expect("just pushed")
    }

    pub fn steps(&self) -> &[TrajectoryStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Hop count so far (one hop per dispatched tool call, counting each
    /// branch of a `parallel` action individually).
    pub fn hop_count(&self) -> u64 {
        self.steps
            .iter()
            .map(|s| match &s.action {
                Action::Parallel { calls, .. } => calls.len() as u64,
                Action::Call { .. } => 1,
                _ => 0,
            })
            .sum()
    }
}

/// A digest summarizing one trajectory for inclusion in a conversation
/// turn's `trajectory_digest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryDigest {
    pub tools_invoked: Vec<String>,
    pub observations_summary: String,
    pub reasoning_summary: Option<String>,
    pub artifacts_refs: Vec<String>,
}

impl TrajectoryDigest {
    pub fn from_trajectory(trajectory: &Trajectory) -> Self {
        let tools_invoked = trajectory
            .steps()
            .iter()
            .filter_map(|s| s.tool_name.clone())
            .collect();
        let observations_summary = trajectory
            .steps()
            .iter()
            .filter_map(|s| match &s.outcome {
                Some(Outcome::Observation(v)) => Some(v.to_string()),
                Some(Outcome::Error(e)) => Some(format!("error[{:?}]: {}", e.code, e.message)),
                None => None,
            })
            .collect::<Vec<_>>()
            .join("; ");
        let artifacts_refs = trajectory
            .steps()
            .iter()
            .flat_map(|s| s.artifacts.clone())
            .collect();
        Self {
            tools_invoked,
            observations_summary,
            reasoning_summary: None,
            artifacts_refs,
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_message: String,
    pub assistant_response: String,
    pub trajectory_digest: Option<TrajectoryDigest>,
    pub artifacts_shown: Vec<String>,
    pub artifacts_hidden_refs: Vec<String>,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_count_counts_parallel_branches() {
        let mut t = Trajectory::new();
        t.push(
            None,
            Action::Parallel {
                calls: vec![
                    ToolCall { tool_name: "a".into(), args: serde_json::json!({}) },
                    ToolCall { tool_name: "b".into(), args: serde_json::json!({}) },
                ],
                join_tool: None,
            },
            None,
            10,
            vec![],
            None,
        );
        t.push(
            None,
            Action::Call { tool_name: "merge".into(), args: serde_json::json!({}) },
            None,
            5,
            vec![],
            Some("merge".into()),
        );
        assert_eq!(t.hop_count(), 3);
    }

    #[test]
    fn steps_are_strictly_indexed() {
        let mut t = Trajectory::new();
        t.push(None, Action::Clarify { question: "?".into() }, None, 0, vec![], None);
        t.push(None, Action::Clarify { question: "??".into() }, None, 0, vec![], None);
        assert_eq!(t.steps()[0].index, 0);
        assert_eq!(t.steps()[1].index, 1);
    }
}
