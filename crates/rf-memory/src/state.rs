//! Memory state and strategy types.

use rf_core::ConversationTurn;
use serde::{Deserialize, Serialize};

/// How `ShortTermMemory` retains turns past `full_zone_turns`.
///
/// `None` disables memory entirely: `add_turn` is a no-op and `get_context`
/// always returns an empty snapshot. `Truncation` keeps the most recent
/// `full_zone_turns` turns verbatim and drops the rest, never invoking a
/// summarizer. `RollingSummary` folds overflow turns into `summary` via the
/// background summarizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStrategy {
    None,
    Truncation,
    RollingSummary,
}

impl Default for MemoryStrategy {
    fn default() -> Self {
        MemoryStrategy::RollingSummary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryHealth {
    Healthy,
    Retry,
    Degraded,
    Recovering,
}

impl Default for MemoryHealth {
    fn default() -> Self {
        MemoryHealth::Healthy
    }
}

/// `{full_zone, summary, pending, health}`.
///
/// Invariants enforced by `ShortTermMemory`, never by direct field access:
/// `|full_zone| <= full_zone_turns`; turns are append-only; under `Healthy`,
/// `estimate(summary) <= summary_max_tokens + slack`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryState {
    pub full_zone: Vec<ConversationTurn>,
    pub summary: String,
    pub pending: Vec<ConversationTurn>,
    pub health: MemoryHealth,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The atomic `(summary, full_zone)` snapshot returned by `get_context`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryContext {
    pub summary: Option<String>,
    pub turns: Vec<ConversationTurn>,
    pub health: MemoryHealth,
}
