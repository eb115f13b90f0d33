//! Pause/resume state: `{query, trajectory,
//! memory_state, budgets_remaining, last_prompt_fingerprint}` serialized to
//! the state store under `(session_id, trace_id)`.

use rf_core::trajectory::Trajectory;
use serde::{Deserialize, Serialize};

use crate::budget::BudgetsRemaining;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerPauseState {
    pub query: String,
    pub trajectory: Trajectory,
    pub memory_state: Option<serde_json::Value>,
    pub budgets_remaining: BudgetsRemaining,
    pub last_prompt_fingerprint: String,
}

/// A cheap, stable fingerprint of a rendered prompt, used only to detect
/// whether a resumed run's first prompt diverges from the one that paused.
pub fn fingerprint(text: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
