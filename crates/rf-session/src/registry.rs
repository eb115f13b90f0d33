//! Task registry: assigns task ids, records status
//! transitions with timestamps, maintains parent/child links, and indexes
//! tasks by session, status, type, and group. Persists each transition to a
//! [`StateStore`] when one is configured.
//!
//! Adapted from a gateway-style `TaskStore`, generalized from a single
//! `HashMap<Uuid, Task>` to a multi-index lookup and to the richer
//! `TaskStatus`/`TaskType` model in `rf_core::session`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rf_core::session::{TaskState, TaskStatus, TaskType};
use rf_core::trace::TraceEvent;
use rf_store::StateStore;
use uuid::Uuid;

#[derive(Default)]
struct Indexes {
    by_session: HashMap<String, HashSet<String>>,
    by_status: HashMap<TaskStatus, HashSet<String>>,
    by_type: HashMap<TaskType, HashSet<String>>,
    by_group: HashMap<String, HashSet<String>>,
    children: HashMap<String, HashSet<String>>,
}

pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskState>>,
    index: RwLock<Indexes>,
    store: Option<Arc<dyn StateStore>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error("illegal transition from {from:?} to {to:?} for task {task_id}")]
    IllegalTransition { task_id: String, from: TaskStatus, to: TaskStatus },
}

impl TaskRegistry {
    pub fn new(store: Option<Arc<dyn StateStore>>) -> Self {
        Self { tasks: RwLock::new(HashMap::new()), index: RwLock::new(Indexes::default()), store }
    }

    /// Assign a task id and register the task as `Pending`.
    pub fn spawn(
        &self,
        session_id: String,
        task_type: TaskType,
        parent_id: Option<String>,
        group_id: Option<String>,
        priority: i32,
    ) -> TaskState {
        let task_id = Uuid::new_v4().to_string();
        let task = TaskState {
            task_id: task_id.clone(),
            session_id: session_id.clone(),
            task_type,
            status: TaskStatus::Pending,
            parent_id: parent_id.clone(),
            group_id: group_id.clone(),
            priority,
            started_at: Utc::now(),
            finished_at: None,
            result: None,
        };

        self.tasks.write().insert(task_id.clone(), task.clone());
        {
            let mut idx = self.index.write();
            idx.by_session.entry(session_id).or_default().insert(task_id.clone());
            idx.by_status.entry(TaskStatus::Pending).or_default().insert(task_id.clone());
            idx.by_type.entry(task_type).or_default().insert(task_id.clone());
            if let Some(g) = &group_id {
                idx.by_group.entry(g.clone()).or_default().insert(task_id.clone());
            }
            if let Some(p) = &parent_id {
                idx.children.entry(p.clone()).or_default().insert(task_id.clone());
            }
        }
        task
    }

    pub fn get(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.read().get(task_id).cloned()
    }

    pub fn children_of(&self, task_id: &str) -> Vec<String> {
        self.index.read().children.get(task_id).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn by_session(&self, session_id: &str) -> Vec<TaskState> {
        self.lookup_many(&self.index.read().by_session, session_id)
    }

    pub fn by_status(&self, status: TaskStatus) -> Vec<TaskState> {
        let ids = self.index.read().by_status.get(&status).cloned().unwrap_or_default();
        self.resolve(ids)
    }

    pub fn by_group(&self, group_id: &str) -> Vec<TaskState> {
        self.lookup_many(&self.index.read().by_group, group_id)
    }

    fn lookup_many(&self, map: &HashMap<String, HashSet<String>>, key: &str) -> Vec<TaskState> {
        let ids = map.get(key).cloned().unwrap_or_default();
        self.resolve(ids)
    }

    fn resolve(&self, ids: HashSet<String>) -> Vec<TaskState> {
        let tasks = self.tasks.read();
        ids.into_iter().filter_map(|id| tasks.get(&id).cloned()).collect()
    }

    /// Move `task_id` to `new_status`, validating the transition against
    /// `TaskStatus::can_transition_to`, updating indexes and timestamps, and
    /// persisting via the state store if one is configured.
    pub async fn transition(&self, task_id: &str, new_status: TaskStatus) -> Result<TaskState, RegistryError> {
        let updated = {
            let mut tasks = self.tasks.write();
            let task = tasks.get_mut(task_id).ok_or_else(|| RegistryError::NotFound(task_id.to_owned()))?;
            if !task.status.can_transition_to(new_status) {
                return Err(RegistryError::IllegalTransition { task_id: task_id.to_owned(), from: task.status, to: new_status });
            }
            task.status = new_status;
            if new_status.is_terminal() {
                task.finished_at = Some(Utc::now());
            }
            task.clone()
        };

        {
            let mut idx = self.index.write();
            for set in idx.by_status.values_mut() {
                set.remove(task_id);
            }
            idx.by_status.entry(new_status).or_default().insert(task_id.to_owned());
        }

        TraceEvent::SteeringDelivered { task_id: task_id.to_owned(), event_type: format!("status:{new_status:?}") }.emit();

        if let Some(store) = &self.store {
            let _ = store.save_task_state(task_id, updated.clone()).await;
        }

        Ok(updated)
    }
}
