//! Session manager: resolves session contexts, serializes per-session runs,
//! and spawns background tasks under `BackgroundTasksConfig` guards.
//!
//! `resolve_or_create` is adapted from a gateway-style `SessionStore`,
//! generalized from a JSON-file-backed `HashMap` to the in-memory map plus
//! optional [`StateStore`] persistence this workspace uses elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rf_core::session::{SessionContext, TaskType};
use rf_core::trace::TraceEvent;
use rf_store::StateStore;
use serde::{Deserialize, Serialize};

use crate::registry::TaskRegistry;
use crate::session_lock::{SessionLock, SessionLockMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextDepth {
    Full,
    Summary,
    Minimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundTasksConfig {
    pub max_concurrent: usize,
    pub max_per_session: usize,
}

impl Default for BackgroundTasksConfig {
    fn default() -> Self {
        Self { max_concurrent: 16, max_per_session: 4 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnGuardError {
    #[error("global background task concurrency limit reached ({0})")]
    GlobalLimitReached(usize),
    #[error("session {session_id} has reached its background task limit ({limit})")]
    SessionLimitReached { session_id: String, limit: usize },
}

pub struct SessionManager {
    contexts: RwLock<HashMap<String, SessionContext>>,
    locks: SessionLockMap,
    pub registry: TaskRegistry,
    background_config: BackgroundTasksConfig,
    active_background: RwLock<HashMap<String, usize>>,
    store: Option<Arc<dyn StateStore>>,
}

impl SessionManager {
    pub fn new(background_config: BackgroundTasksConfig, store: Option<Arc<dyn StateStore>>) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            locks: SessionLockMap::new(),
            registry: TaskRegistry::new(store.clone()),
            background_config,
            active_background: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Resolve an existing session context or create a fresh empty one.
    /// Returns `(context, is_new)`.
    pub fn resolve_or_create(&self, session_id: &str) -> (SessionContext, bool) {
        {
            let contexts = self.contexts.read();
            if let Some(ctx) = contexts.get(session_id) {
                return (ctx.clone(), false);
            }
        }
        let ctx = SessionContext::new(serde_json::json!({}), serde_json::json!({}));
        self.contexts.write().insert(session_id.to_owned(), ctx.clone());
        TraceEvent::SessionResolved { session_id: session_id.to_owned(), is_new: true }.emit();
        (ctx, true)
    }

    pub fn update_context(&self, session_id: &str, ctx: SessionContext) {
        self.contexts.write().insert(session_id.to_owned(), ctx);
    }

    /// Acquire the FIFO serialization slot for `session_id`.
    pub async fn acquire_session(&self, session_id: &str) -> SessionLock {
        self.locks.acquire(session_id).await
    }

    /// Validate a background-task spawn request against `BackgroundTasksConfig`.
    /// On success, reserves a slot; callers must release it
    /// via [`SessionManager::release_background_slot`] when the task ends.
    pub fn guard_background_spawn(&self, session_id: &str) -> Result<(), SpawnGuardError> {
        let mut active = self.active_background.write();
        let total: usize = active.values().sum();
        if total >= self.background_config.max_concurrent {
            return Err(SpawnGuardError::GlobalLimitReached(self.background_config.max_concurrent));
        }
        let per_session = active.entry(session_id.to_owned()).or_insert(0);
        if *per_session >= self.background_config.max_per_session {
            return Err(SpawnGuardError::SessionLimitReached {
                session_id: session_id.to_owned(),
                limit: self.background_config.max_per_session,
            });
        }
        *per_session += 1;
        Ok(())
    }

    pub fn release_background_slot(&self, session_id: &str) {
        let mut active = self.active_background.write();
        if let Some(count) = active.get_mut(session_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Spawn a background task: validate guards, capture a context snapshot
    /// at `depth`, and register it in the task registry.
    /// The caller is responsible for actually forking a runtime with the
    /// returned snapshot — registration only records bookkeeping.
    pub async fn spawn_background(
        &self,
        session_id: &str,
        depth: ContextDepth,
        group_id: Option<String>,
    ) -> Result<(rf_core::session::TaskState, serde_json::Value, u64, String), SpawnGuardError> {
        self.guard_background_spawn(session_id)?;

        let (ctx, _) = self.resolve_or_create(session_id);
        let snapshot = match depth {
            ContextDepth::Full => ctx.llm_context.clone(),
            ContextDepth::Summary => serde_json::json!({"summary_of": ctx.llm_context}),
            ContextDepth::Minimal => serde_json::json!({}),
        };

        let task = self.registry.spawn(session_id.to_owned(), TaskType::BackgroundSubagent, None, group_id, 0);
        self.registry
            .transition(&task.task_id, rf_core::session::TaskStatus::Queued)
            .await
            .expect("pending -> queued is legal");
        let running = self
            .registry
            .transition(&task.task_id, rf_core::session::TaskStatus::Running)
            .await
            .expect("queued -> running is legal");

        if let Some(store) = &self.store {
            let _ = store.save_task_state(&running.task_id, running.clone()).await;
        }

        Ok((running, snapshot, ctx.version, ctx.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_or_create_is_idempotent() {
        let mgr = SessionManager::new(BackgroundTasksConfig::default(), None);
        let (ctx1, is_new1) = mgr.resolve_or_create("s1");
        let (ctx2, is_new2) = mgr.resolve_or_create("s1");
        assert!(is_new1);
        assert!(!is_new2);
        assert_eq!(ctx1.hash, ctx2.hash);
    }

    #[tokio::test]
    async fn per_session_background_limit_is_enforced() {
        let mgr = SessionManager::new(BackgroundTasksConfig { max_concurrent: 100, max_per_session: 1 }, None);
        mgr.spawn_background("s1", ContextDepth::Minimal, None).await.unwrap();
        let err = mgr.spawn_background("s1", ContextDepth::Minimal, None).await.unwrap_err();
        assert!(matches!(err, SpawnGuardError::SessionLimitReached { .. }));
    }

    #[tokio::test]
    async fn releasing_a_slot_allows_a_new_spawn() {
        let mgr = SessionManager::new(BackgroundTasksConfig { max_concurrent: 100, max_per_session: 1 }, None);
        mgr.spawn_background("s1", ContextDepth::Minimal, None).await.unwrap();
        mgr.release_background_slot("s1");
        assert!(mgr.spawn_background("s1", ContextDepth::Minimal, None).await.is_ok());
    }

    #[tokio::test]
    async fn global_limit_is_enforced_across_sessions() {
        let mgr = SessionManager::new(BackgroundTasksConfig { max_concurrent: 1, max_per_session: 10 }, None);
        mgr.spawn_background("s1", ContextDepth::Minimal, None).await.unwrap();
        let err = mgr.spawn_background("s2", ContextDepth::Minimal, None).await.unwrap_err();
        assert!(matches!(err, SpawnGuardError::GlobalLimitReached(_)));
    }
}
