//! `ShortTermMemory`: per-key rolling summary with a non-blocking write path
//! and a four-state summarizer health machine.
//!
//! `add_turn` never blocks on the LLM: it appends to `pending` and, if no
//! summarization is already in flight for that key, spawns one in the
//! background. `get_context` always returns immediately from whatever state
//! is currently committed — callers never wait on a summarizer.

use std::collections::HashMap;
use std::sync::Arc;

use rf_core::session::MemoryKey;
use rf_core::ConversationTurn;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::estimator::{DefaultEstimator, TokenEstimator};
use crate::state::{MemoryContext, MemoryHealth, MemoryState, MemoryStrategy};
use crate::summarizer::Summarizer;
use rf_store::StateStore;

/// Tunables for a `ShortTermMemory` instance. Defaults mirror typical
/// context-pack budgets, scaled down: this crate summarizes conversation
/// turns, not workspace files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Which retention strategy `add_turn`/`get_context` follow.
    pub strategy: MemoryStrategy,
    /// Turns kept verbatim in `full_zone` before folding into `summary`
    /// (`RollingSummary`) or before the oldest are dropped (`Truncation`).
    pub full_zone_turns: usize,
    /// Token budget for `summary` once `Healthy`.
    pub summary_max_tokens: usize,
    /// Extra tokens tolerated before a truncation pass runs.
    pub summary_slack_tokens: usize,
    /// Turns retained in `pending` while `Degraded`, oldest dropped past this.
    pub recovery_backlog_limit: usize,
    /// Consecutive summarizer failures tolerated in `Retry` before `Degraded`.
    pub max_retry_attempts: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            strategy: MemoryStrategy::RollingSummary,
            full_zone_turns: 8,
            summary_max_tokens: 2000,
            summary_slack_tokens: 200,
            recovery_backlog_limit: 50,
            max_retry_attempts: 3,
        }
    }
}

struct Entry {
    state: MemoryState,
    /// Consecutive failures seen since the last `Healthy` summary, used to
    /// decide the `Retry -> Degraded` transition.
    retry_attempts: u32,
    /// True while a background summarization task owns this key, so
    /// `add_turn` does not spawn a second one concurrently.
    summarizing: bool,
}

impl Default for Entry {
    fn default() -> Self {
        Self { state: MemoryState::new(), retry_attempts: 0, summarizing: false }
    }
}

pub struct ShortTermMemory {
    config: MemoryConfig,
    summarizer: Arc<dyn Summarizer>,
    estimator: Arc<dyn TokenEstimator>,
    store: Option<Arc<dyn StateStore>>,
    entries: AsyncMutex<HashMap<MemoryKey, Entry>>,
}

impl ShortTermMemory {
    pub fn new(config: MemoryConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            config,
            summarizer,
            estimator: Arc::new(DefaultEstimator),
            store: None,
            entries: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Append `turn` to `key`'s memory per `config.strategy`. Never awaits
    /// the summarizer: `RollingSummary` either starts a background fold or
    /// leaves `pending` to grow, bounded by `recovery_backlog_limit` once
    /// `Degraded`. `None` disables memory outright. `Truncation` keeps the
    /// newest `full_zone_turns` turns and never touches the summarizer.
    pub async fn add_turn(self: &Arc<Self>, key: MemoryKey, turn: ConversationTurn) {
        if self.config.strategy == MemoryStrategy::None {
            return;
        }

        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();
        entry.state.full_zone.push(turn.clone());

        if self.config.strategy == MemoryStrategy::Truncation {
            if entry.state.full_zone.len() > self.config.full_zone_turns {
                let overflow = entry.state.full_zone.len() - self.config.full_zone_turns;
                entry.state.full_zone.drain(0..overflow);
            }
            return;
        }

        entry.state.pending.push(turn);

        if entry.state.health == MemoryHealth::Degraded
            && entry.state.pending.len() > self.config.recovery_backlog_limit
        {
            let overflow = entry.state.pending.len() - self.config.recovery_backlog_limit;
            entry.state.pending.drain(0..overflow);
        }

        if entry.state.full_zone.len() <= self.config.full_zone_turns {
            return;
        }
        if entry.summarizing {
            return;
        }
        entry.summarizing = true;
        drop(entries);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_summarization(key).await;
        });
    }

    /// Return the current `(summary, recent turns)` snapshot for `key`.
    /// Always non-blocking with respect to the summarizer. Under `None`,
    /// `add_turn` never populated an entry, so this always yields empty.
    pub async fn get_context(&self, key: &MemoryKey) -> MemoryContext {
        if self.config.strategy == MemoryStrategy::None {
            return MemoryContext { summary: None, turns: Vec::new(), health: MemoryHealth::Healthy };
        }

        let entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) => MemoryContext {
                summary: if entry.state.summary.is_empty() { None } else { Some(entry.state.summary.clone()) },
                turns: entry.state.full_zone.clone(),
                health: entry.state.health,
            },
            None => MemoryContext { summary: None, turns: Vec::new(), health: MemoryHealth::Healthy },
        }
    }

    async fn run_summarization(self: Arc<Self>, key: MemoryKey) {
        let (prior_summary, to_fold) = {
            let entries = self.entries.lock().await;
            let entry = entries.get(&key).expect("entry exists while summarizing");
            (entry.state.summary.clone(), entry.state.full_zone.clone())
        };

        match self.summarizer.summarize(&prior_summary, &to_fold).await {
            Ok(new_summary) => {
                let (capped, truncated) = crate::truncation::cap_to_tokens(
                    &new_summary,
                    self.config.summary_max_tokens + self.config.summary_slack_tokens,
                    self.estimator.as_ref(),
                );
                if truncated {
                    warn!(target: "reactorflow_memory", "summary truncated to fit budget");
                }

                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.get_mut(&key) {
                    let was_recovering = entry.state.health == MemoryHealth::Recovering;
                    entry.state.summary = capped;
                    entry.state.full_zone.clear();
                    entry.state.pending.clear();
                    entry.retry_attempts = 0;
                    entry.state.health = MemoryHealth::Healthy;
                    entry.summarizing = false;
                    if was_recovering {
                        tracing::info!(target: "reactorflow_memory", "memory recovered for key");
                    }
                }
                if let Some(store) = &self.store {
                    if store.supports_memory() {
                        let snapshot = {
                            let entries = self.entries.lock().await;
                            entries.get(&key).map(|e| e.state.clone())
                        };
                        if let Some(snapshot) = snapshot {
                            if let Ok(value) = serde_json::to_value(&snapshot) {
                                let _ = store.save_memory_state(&key.as_string(), value).await;
                            }
                        }
                    }
                }
            }
            Err(err) => {
                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.get_mut(&key) {
                    entry.retry_attempts += 1;
                    entry.state.health = if entry.retry_attempts >= self.config.max_retry_attempts {
                        MemoryHealth::Degraded
                    } else if entry.state.health == MemoryHealth::Degraded {
                        MemoryHealth::Recovering
                    } else {
                        MemoryHealth::Retry
                    };
                    entry.summarizing = false;
                    warn!(target: "reactorflow_memory", error = %err, health = ?entry.state.health, "summarization failed");
                }
            }
        }
    }
}
