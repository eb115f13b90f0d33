//! Middleware observer chain: after-the-fact observers of lifecycle events.
//! `MiddlewareChain::notify` itself awaits each observer in order; the
//! runtime keeps this off the data path by spawning the `notify` call
//! rather than awaiting it inline in the worker loop.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    NodeStarted { node_name: String, trace_id: String },
    NodeFinished { node_name: String, trace_id: String, latency_ms: u64 },
    NodeError { node_name: String, trace_id: String, code: String },
    MessageEmitted { node_name: String, trace_id: String, successors: usize },
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn on_event(&self, event: &RuntimeEvent);
}

#[derive(Default)]
pub struct MiddlewareChain {
    observers: Vec<std::sync::Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: std::sync::Arc<dyn Middleware>) {
        self.observers.push(observer);
    }

    /// Fan out `event` to every observer in order, awaiting each in turn.
    /// Errors are not possible by construction (the trait returns `()`), but
    /// a slow observer here does delay the next one and, if called inline,
    /// the caller. Callers on a latency-sensitive path should spawn this.
    pub async fn notify(&self, event: RuntimeEvent) {
        for observer in &self.observers {
            observer.on_event(&event).await;
        }
    }
}
