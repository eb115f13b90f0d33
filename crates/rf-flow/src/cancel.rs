//! Level-triggered, idempotent cancellation: a `CancelToken`/`CancelMap`
//! pair built on an `Arc<AtomicBool>` latch checked at suspension points,
//! plus a registry that cascades a cancel to every trace_id derived from a
//! parent (sub-flow calls).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    /// Idempotent: cancelling an already-cancelled token is a no-op.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Suspend until cancelled. Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Registers a `CancelToken` per `trace_id` and cascades cancellation to
/// every child trace registered under a parent (sub-flow calls).
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    children: Mutex<HashMap<String, HashSet<String>>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, trace_id: &str) -> CancelToken {
        let mut tokens = self.tokens.lock();
        tokens.entry(trace_id.to_owned()).or_insert_with(CancelToken::new).clone()
    }

    pub fn register_child(&self, parent_trace_id: &str, child_trace_id: &str) -> CancelToken {
        self.children.lock().entry(parent_trace_id.to_owned()).or_default().insert(child_trace_id.to_owned());
        self.register(child_trace_id)
    }

    pub fn token(&self, trace_id: &str) -> Option<CancelToken> {
        self.tokens.lock().get(trace_id).cloned()
    }

    pub fn cancel(&self, trace_id: &str) {
        if let Some(token) = self.tokens.lock().get(trace_id) {
            token.cancel();
        }
        let children = self.children.lock().get(trace_id).cloned().unwrap_or_default();
        for child in children {
            self.cancel(&child);
        }
    }

    pub fn remove(&self, trace_id: &str) {
        self.tokens.lock().remove(trace_id);
        self.children.lock().remove(trace_id);
    }
}
