//! Task groups: `{open -> sealed -> complete|failed}`,
//! with a completion policy deciding when the aggregate fires and a
//! cancellation-cascade policy deciding whether cancelling the group cancels
//! its members.

use std::collections::HashMap;

use parking_lot::Mutex;
use rf_core::session::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Open,
    Sealed,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    All,
    Any,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPropagation {
    Cascade,
    Isolate,
}

struct Group {
    state: GroupState,
    completion_policy: CompletionPolicy,
    cancel_propagation: CancelPropagation,
    members: Vec<String>,
}

pub struct TaskGroups {
    groups: Mutex<HashMap<String, Group>>,
}

impl Default for TaskGroups {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroups {
    pub fn new() -> Self {
        Self { groups: Mutex::new(HashMap::new()) }
    }

    pub fn open(&self, group_id: impl Into<String>, completion_policy: CompletionPolicy, cancel_propagation: CancelPropagation) {
        self.groups.lock().insert(
            group_id.into(),
            Group { state: GroupState::Open, completion_policy, cancel_propagation, members: Vec::new() },
        );
    }

    pub fn add_member(&self, group_id: &str, task_id: impl Into<String>) {
        if let Some(group) = self.groups.lock().get_mut(group_id) {
            if group.state == GroupState::Open {
                group.members.push(task_id.into());
            }
        }
    }

    /// Seal a group so no further members may be added; completion can now
    /// be evaluated against a fixed membership.
    pub fn seal(&self, group_id: &str) {
        if let Some(group) = self.groups.lock().get_mut(group_id) {
            if group.state == GroupState::Open {
                group.state = GroupState::Sealed;
            }
        }
    }

    pub fn state(&self, group_id: &str) -> Option<GroupState> {
        self.groups.lock().get(group_id).map(|g| g.state)
    }

    pub fn members(&self, group_id: &str) -> Vec<String> {
        self.groups.lock().get(group_id).map(|g| g.members.clone()).unwrap_or_default()
    }

    /// Whether cancelling this group should cascade to its member tasks.
    pub fn cascades_on_cancel(&self, group_id: &str) -> bool {
        self.groups
            .lock()
            .get(group_id)
            .map(|g| g.cancel_propagation == CancelPropagation::Cascade)
            .unwrap_or(false)
    }

    /// Evaluate the group's completion policy against the current status of
    /// each member (supplied by the caller, typically from `TaskRegistry`).
    /// Only meaningful once the group is `Sealed`; returns `None` while
    /// `Open` since membership may still change.
    pub fn evaluate(&self, group_id: &str, member_statuses: &HashMap<String, TaskStatus>) -> Option<GroupState> {
        let mut groups = self.groups.lock();
        let group = groups.get_mut(group_id)?;
        if group.state == GroupState::Open {
            return None;
        }
        if group.state != GroupState::Sealed {
            return Some(group.state);
        }

        let statuses: Vec<TaskStatus> = group.members.iter().filter_map(|m| member_statuses.get(m).copied()).collect();
        if statuses.len() < group.members.len() {
            return Some(GroupState::Sealed);
        }

        let any_failed = statuses.iter().any(|s| matches!(s, TaskStatus::Failed | TaskStatus::Cancelled));
        let all_terminal = statuses.iter().all(|s| s.is_terminal());
        let any_terminal = statuses.iter().any(|s| s.is_terminal());

        let fires = match group.completion_policy {
            CompletionPolicy::All => all_terminal,
            CompletionPolicy::Any => any_terminal,
            CompletionPolicy::None => false,
        };

        if fires {
            group.state = if any_failed { GroupState::Failed } else { GroupState::Complete };
        }
        Some(group.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_policy_waits_for_every_member() {
        let groups = TaskGroups::new();
        groups.open("g1", CompletionPolicy::All, CancelPropagation::Cascade);
        groups.add_member("g1", "t1");
        groups.add_member("g1", "t2");
        groups.seal("g1");

        let mut statuses = HashMap::new();
        statuses.insert("t1".to_string(), TaskStatus::Complete);
        assert_eq!(groups.evaluate("g1", &statuses), Some(GroupState::Sealed));

        statuses.insert("t2".to_string(), TaskStatus::Complete);
        assert_eq!(groups.evaluate("g1", &statuses), Some(GroupState::Complete));
    }

    #[test]
    fn any_failed_member_marks_group_failed() {
        let groups = TaskGroups::new();
        groups.open("g1", CompletionPolicy::All, CancelPropagation::Isolate);
        groups.add_member("g1", "t1");
        groups.add_member("g1", "t2");
        groups.seal("g1");

        let mut statuses = HashMap::new();
        statuses.insert("t1".to_string(), TaskStatus::Complete);
        statuses.insert("t2".to_string(), TaskStatus::Failed);
        assert_eq!(groups.evaluate("g1", &statuses), Some(GroupState::Failed));
    }

    #[test]
    fn any_policy_fires_on_first_terminal_member() {
        let groups = TaskGroups::new();
        groups.open("g1", CompletionPolicy::Any, CancelPropagation::Cascade);
        groups.add_member("g1", "t1");
        groups.add_member("g1", "t2");
        groups.seal("g1");

        let mut statuses = HashMap::new();
        statuses.insert("t1".to_string(), TaskStatus::Running);
        statuses.insert("t2".to_string(), TaskStatus::Complete);
        assert_eq!(groups.evaluate("g1", &statuses), Some(GroupState::Complete));
    }

    #[test]
    fn open_group_never_evaluates() {
        let groups = TaskGroups::new();
        groups.open("g1", CompletionPolicy::All, CancelPropagation::Cascade);
        assert_eq!(groups.evaluate("g1", &HashMap::new()), None);
    }
}
