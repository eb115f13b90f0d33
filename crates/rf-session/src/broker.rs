//! Update broker: publish-subscribe for task lifecycle updates. Per-subscriber
//! bounded queue with drop-oldest on overflow; filtering by
//! `task_id`/`update_type`; delivery preserves each subscriber's publication
//! order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Progress,
    StatusChange,
    Result,
    Error,
    ArtifactStored,
    ResourceUpdated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub task_id: String,
    pub update_type: UpdateType,
    pub payload: Value,
    pub seq: u64,
}

struct Mailbox {
    queue: Mutex<VecDeque<Update>>,
    notify: Notify,
    capacity: usize,
    task_filter: Option<String>,
    type_filter: Option<Vec<UpdateType>>,
}

impl Mailbox {
    fn matches(&self, update: &Update) -> bool {
        if let Some(filter) = &self.task_filter {
            if filter != &update.task_id {
                return false;
            }
        }
        if let Some(types) = &self.type_filter {
            if !types.contains(&update.update_type) {
                return false;
            }
        }
        true
    }

    fn push(&self, update: Update) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(update);
        drop(queue);
        self.notify.notify_one();
    }
}

/// A subscriber's view onto its mailbox. Iterating yields updates in the
/// order they were published, skipping any dropped by overflow.
pub struct Subscription {
    pub id: u64,
    mailbox: Arc<Mailbox>,
    broker: Arc<SubscriberRegistry>,
}

impl Subscription {
    /// Suspend until an update is available, then return the oldest one.
    pub async fn recv(&mut self) -> Update {
        loop {
            if let Some(update) = self.mailbox.queue.lock().pop_front() {
                return update;
            }
            self.mailbox.notify.notified().await;
        }
    }

    /// Non-blocking drain of everything currently queued.
    pub fn drain(&self) -> Vec<Update> {
        self.mailbox.queue.lock().drain(..).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.mailboxes.lock().remove(&self.id);
    }
}

#[derive(Default)]
struct SubscriberRegistry {
    mailboxes: Mutex<HashMap<u64, Arc<Mailbox>>>,
}

pub struct UpdateBroker {
    registry: Arc<SubscriberRegistry>,
    next_sub_id: AtomicU64,
    next_seq: AtomicU64,
    queue_capacity: usize,
}

impl UpdateBroker {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: Arc::new(SubscriberRegistry::default()),
            next_sub_id: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn subscribe(&self, task_filter: Option<String>, type_filter: Option<Vec<UpdateType>>) -> Subscription {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let mailbox = Arc::new(Mailbox {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.queue_capacity,
            task_filter,
            type_filter,
        });
        self.registry.mailboxes.lock().insert(id, mailbox.clone());
        Subscription { id, mailbox, broker: self.registry.clone() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.mailboxes.lock().len()
    }

    /// Publish `update` to every subscriber whose filters match. Full
    /// mailboxes drop the oldest queued update to make room for this one.
    pub fn publish(&self, task_id: impl Into<String>, update_type: UpdateType, payload: Value) {
        let update = Update {
            task_id: task_id.into(),
            update_type,
            payload,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        };

        let mailboxes = self.registry.mailboxes.lock();
        for mailbox in mailboxes.values() {
            if mailbox.matches(&update) {
                mailbox.push(update.clone());
            }
        }
    }
}
