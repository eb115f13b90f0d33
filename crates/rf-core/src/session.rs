//! Session, task, and steering data model: the types shared between
//! `rf-session` (which owns the behavior) and other crates that need to
//! name them without depending on the session-manager implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite key used to isolate short-term memory per tenant, user, and
/// session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemoryKey {
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: String,
}

impl MemoryKey {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    pub fn as_string(&self) -> String {
        format!("{}/{}/{}", self.tenant_id, self.user_id, self.session_id)
    }
}

/// A fully-resolved or partial memory key, used at the call boundary where
/// `require_explicit_key` fail-closed semantics apply.
#[derive(Debug, Clone, Default)]
pub struct PartialMemoryKey {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl PartialMemoryKey {
    /// Resolve to a complete key, or `None` if any component is missing
    /// (the caller decides, per `require_explicit_key`, whether a missing
    /// key disables memory for the call).
    pub fn resolve(&self) -> Option<MemoryKey> {
        Some(MemoryKey::new(
            self.tenant_id.clone()?,
            self.user_id.clone()?,
            self.session_id.clone()?,
        ))
    }
}

/// The LLM-visible and tool-only halves of a session's context.
/// `tool_context` must never be serialized into an LLM prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub llm_context: serde_json::Value,
    #[serde(skip_serializing)]
    pub tool_context: serde_json::Value,
    pub version: u64,
    pub hash: String,
}

impl SessionContext {
    pub fn new(llm_context: serde_json::Value, tool_context: serde_json::Value) -> Self {
        let hash = Self::compute_hash(&llm_context);
        Self {
            llm_context,
            tool_context,
            version: 0,
            hash,
        }
    }

    pub fn compute_hash(llm_context: &serde_json::Value) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        llm_context.to_string().hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Recompute `hash` from the current `llm_context` and bump `version`.
    pub fn bump(&mut self) {
        self.version += 1;
        self.hash = Self::compute_hash(&self.llm_context);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Foreground,
    BackgroundSubagent,
    BackgroundJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Complete,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Whether transitioning from `self` to `next` is legal under
    /// `PENDING → QUEUED → RUNNING → (PAUSED ⇆ RUNNING) →
    /// (COMPLETE|FAILED|CANCELLED)`. Terminal states are absorbing.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Complete)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Cancelled)
                | (Queued, Cancelled)
                | (Pending, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub session_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub parent_id: Option<String>,
    pub group_id: Option<String>,
    pub priority: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStrategy {
    Append,
    Replace,
    HumanGated,
}

/// A merge-ready diff produced by a completed background task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPatch {
    pub task_id: String,
    pub source_version: u64,
    pub source_hash: String,
    pub merge_strategy: MergeStrategy,
    pub facts: BTreeMap<String, serde_json::Value>,
    pub artifacts: Vec<String>,
    pub payload: serde_json::Value,
    pub divergent: Option<bool>,
}

impl ContextPatch {
    /// Stamp `divergent` against the session's current context:
    /// `divergent = (source_hash != session.hash at apply time)`.
    pub fn stamp_divergence(&mut self, current_hash: &str) {
        self.divergent = Some(self.source_hash != current_hash);
    }
}

/// Steering event tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SteeringEvent {
    InjectContext { text: String },
    Redirect { goal: String },
    Cancel,
    Pause,
    Resume,
    Approve { patch_task_id: String },
    Reject { patch_task_id: String, reason: Option<String> },
    UserMessage { text: String },
    Prioritize { priority: i32 },
}

impl SteeringEvent {
    pub fn is_cancel(&self) -> bool {
        matches!(self, SteeringEvent::Cancel)
    }
}
