//! The state store contract: optional, duck-typed persistence hooks.
//!
//! Every operation has a default no-op/`None` implementation, so an adapter
//! only needs to override the subset it actually backs (Redis, SQLite,
//! Postgres are all deliberately out of scope here). A feature's absence
//! degrades it to in-process-only behavior; callers in `rf-planner` and
//! `rf-session` never treat a missing method as an error.

use async_trait::async_trait;
use rf_core::{Error, Result, SteeringEvent, TaskState};

/// Durable persistence hooks a [`StateStore`] implementation may back.
///
/// Mirrors a duck-typed `AppState`-held collection of stores (e.g.
/// `ApprovalStore`, `TaskStore`) but generalized behind a trait so the
/// planner and session manager never depend on a concrete backend.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_pause(&self, _session_id: &str, _trace_id: &str, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn load_pause(&self, _session_id: &str, _trace_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn save_memory_state(&self, _key: &str, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn load_memory_state(&self, _key: &str) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn append_event(&self, _trace_id: &str, _event: serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn replay_events(&self, _trace_id: &str) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }

    async fn save_task_state(&self, _task_id: &str, _state: TaskState) -> Result<()> {
        Ok(())
    }

    async fn load_task(&self, _task_id: &str) -> Result<Option<TaskState>> {
        Ok(None)
    }

    async fn save_steering(&self, _task_id: &str, _event: SteeringEvent) -> Result<()> {
        Ok(())
    }

    async fn drain_steering(&self, _task_id: &str) -> Result<Vec<SteeringEvent>> {
        Ok(Vec::new())
    }

    /// Whether this store actually backs memory persistence. `rf-memory`
    /// consults this (rather than probing `save_memory_state` for an
    /// error) to decide whether to fall back to in-process-only state.
    fn supports_memory(&self) -> bool {
        false
    }

    /// Whether this store actually backs pause/resume persistence.
    fn supports_pause(&self) -> bool {
        false
    }
}

/// A reference, in-process [`StateStore`] used by tests and as a default
/// when no durable backend is wired up. Backs every operation with a
/// `parking_lot`-free `std::sync::Mutex`-guarded map — adequate for tests,
/// not a production backend (no concurrent-writer tuning, no eviction).
pub struct InMemoryStateStore {
    pauses: std::sync::Mutex<std::collections::HashMap<(String, String), serde_json::Value>>,
    memory: std::sync::Mutex<std::collections::HashMap<String, serde_json::Value>>,
    events: std::sync::Mutex<std::collections::HashMap<String, Vec<serde_json::Value>>>,
    tasks: std::sync::Mutex<std::collections::HashMap<String, TaskState>>,
    steering: std::sync::Mutex<std::collections::HashMap<String, Vec<SteeringEvent>>>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            pauses: std::sync::Mutex::new(std::collections::HashMap::new()),
            memory: std::sync::Mutex::new(std::collections::HashMap::new()),
            events: std::sync::Mutex::new(std::collections::HashMap::new()),
            tasks: std::sync::Mutex::new(std::collections::HashMap::new()),
            steering: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn lock_err<T>(_: std::sync::PoisonError<T>) -> Error {
        Error::Other("state store lock poisoned".into())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save_pause(&self, session_id: &str, trace_id: &str, state: serde_json::Value) -> Result<()> {
        self.pauses
            .lock()
            .map_err(Self::lock_err)?
            .insert((session_id.to_owned(), trace_id.to_owned()), state);
        Ok(())
    }

    async fn load_pause(&self, session_id: &str, trace_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .pauses
            .lock()
            .map_err(Self::lock_err)?
            .get(&(session_id.to_owned(), trace_id.to_owned()))
            .cloned())
    }

    async fn save_memory_state(&self, key: &str, state: serde_json::Value) -> Result<()> {
        self.memory.lock().map_err(Self::lock_err)?.insert(key.to_owned(), state);
        Ok(())
    }

    async fn load_memory_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.memory.lock().map_err(Self::lock_err)?.get(key).cloned())
    }

    async fn append_event(&self, trace_id: &str, event: serde_json::Value) -> Result<()> {
        self.events
            .lock()
            .map_err(Self::lock_err)?
            .entry(trace_id.to_owned())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn replay_events(&self, trace_id: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .events
            .lock()
            .map_err(Self::lock_err)?
            .get(trace_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_task_state(&self, task_id: &str, state: TaskState) -> Result<()> {
        self.tasks.lock().map_err(Self::lock_err)?.insert(task_id.to_owned(), state);
        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<TaskState>> {
        Ok(self.tasks.lock().map_err(Self::lock_err)?.get(task_id).cloned())
    }

    async fn save_steering(&self, task_id: &str, event: SteeringEvent) -> Result<()> {
        self.steering
            .lock()
            .map_err(Self::lock_err)?
            .entry(task_id.to_owned())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn drain_steering(&self, task_id: &str) -> Result<Vec<SteeringEvent>> {
        Ok(self
            .steering
            .lock()
            .map_err(Self::lock_err)?
            .remove(task_id)
            .unwrap_or_default())
    }

    fn supports_memory(&self) -> bool {
        true
    }

    fn supports_pause(&self) -> bool {
        true
    }
}
