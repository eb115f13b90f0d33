//! Steering inbox: a per-task bounded FIFO of
//! `SteeringEvent`s. `push` never blocks — a full inbox drops the event and
//! logs. `next` suspends until an event is available. A sticky `cancelled`
//! flag, once set by the first `CANCEL`, is observable without draining —
//! the same latch-and-observe shape as `CancelToken`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rf_core::session::SteeringEvent;
use tokio::sync::Notify;
use tracing::warn;

pub struct SteeringInbox {
    task_id: String,
    queue: Mutex<VecDeque<SteeringEvent>>,
    capacity: usize,
    notify: Notify,
    cancelled: AtomicBool,
}

impl SteeringInbox {
    pub fn new(task_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            task_id: task_id.into(),
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Enqueue `event`, non-blocking. Drops and logs if the inbox is full;
    /// a `Cancel` always latches the sticky flag even when dropped, since
    /// cancellation must never be silently lost.
    pub fn push(&self, event: SteeringEvent) {
        if event.is_cancel() {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            warn!(task_id = %self.task_id, "steering inbox full, dropping event");
            return;
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    /// Suspend until an event is available, then return it.
    pub async fn next(&self) -> SteeringEvent {
        loop {
            if let Some(event) = self.queue.lock().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking snapshot: drains everything currently queued.
    pub fn drain(&self) -> Vec<SteeringEvent> {
        self.queue.lock().drain(..).collect()
    }

    pub fn has_event(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    /// Whether a `Cancel` has ever been pushed, regardless of whether it was
    /// later drained.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Suspend until a `Cancel` is observed. Returns immediately if already
    /// cancelled. Meant to be raced via `tokio::select!` against in-flight
    /// work so a cancel mid-dispatch is observed without waiting for the
    /// next `drain()` at the top of the loop.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_drain_preserve_order() {
        let inbox = SteeringInbox::new("t1", 8);
        inbox.push(SteeringEvent::Pause);
        inbox.push(SteeringEvent::Resume);
        let drained = inbox.drain();
        assert!(matches!(drained[0], SteeringEvent::Pause));
        assert!(matches!(drained[1], SteeringEvent::Resume));
    }

    #[test]
    fn full_inbox_drops_new_events() {
        let inbox = SteeringInbox::new("t1", 1);
        inbox.push(SteeringEvent::Pause);
        inbox.push(SteeringEvent::Resume);
        let drained = inbox.drain();
        assert_eq!(drained.len(), 1);
        assert!(matches!(drained[0], SteeringEvent::Pause));
    }

    #[test]
    fn cancel_latches_even_if_queue_is_full() {
        let inbox = SteeringInbox::new("t1", 1);
        inbox.push(SteeringEvent::Pause);
        inbox.push(SteeringEvent::Cancel);
        assert!(inbox.is_cancelled());
    }

    #[test]
    fn cancel_observable_without_draining() {
        let inbox = SteeringInbox::new("t1", 8);
        inbox.push(SteeringEvent::Cancel);
        assert!(inbox.is_cancelled());
        assert!(inbox.has_event());
    }

    #[tokio::test]
    async fn next_suspends_until_pushed() {
        let inbox = std::sync::Arc::new(SteeringInbox::new("t1", 8));
        let waiter = {
            let inbox = inbox.clone();
            tokio::spawn(async move { inbox.next().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        inbox.push(SteeringEvent::Resume);
        let event = waiter.await.unwrap();
        assert!(matches!(event, SteeringEvent::Resume));
    }
}
