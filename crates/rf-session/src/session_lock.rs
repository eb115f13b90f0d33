//! Per-session FIFO serialization. Runs addressed to the same `session_id` are
//! totally ordered; runs for different sessions proceed concurrently.
//!
//! A lazily-created `Semaphore::new(1)` per key, acquired in FIFO order by
//! `tokio::sync`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Held while a run owns its session's turn. Dropping it releases the next
/// waiter in FIFO order.
pub struct SessionLock {
    _permit: OwnedSemaphorePermit,
}

/// Per-session-id semaphore map. One real lock per `session_id`; map entries
/// for idle sessions can be pruned without affecting lock correctness since
/// `Arc<Semaphore>` keeps a held lock alive even after its map entry is gone.
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    fn semaphore_for(&self, session_id: &str) -> Arc<Semaphore> {
        let mut locks = self.locks.lock();
        locks.entry(session_id.to_owned()).or_insert_with(|| Arc::new(Semaphore::new(1))).clone()
    }

    /// Acquire the serialization slot for `session_id`, suspending until any
    /// prior run for the same session completes.
    pub async fn acquire(&self, session_id: &str) -> SessionLock {
        let sem = self.semaphore_for(session_id);
        let permit = sem.acquire_owned().await.expect("semaphore never closed");
        SessionLock { _permit: permit }
    }

    /// Number of session ids tracked, including ones with no active waiters.
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop map entries for sessions with no outstanding permits, bounding
    /// memory for long-lived processes with many short-lived sessions.
    pub fn prune_idle(&self) {
        self.locks.lock().retain(|_, sem| Arc::strong_count(sem) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn sequential_access_is_ordered() {
        let map = Arc::new(SessionLockMap::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let m1 = map.clone();
        let o1 = order.clone();
        let first = tokio::spawn(async move {
            let _g = m1.acquire("s1").await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            o1.lock().push(1);
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let m2 = map.clone();
        let o2 = order.clone();
        let second = tokio::spawn(async move {
            let _g = m2.acquire("s1").await;
            o2.lock().push(2);
        });

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let map = Arc::new(SessionLockMap::new());
        let counter = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let map = map.clone();
            let counter = counter.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _g = map.acquire(&format!("session-{i}")).await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn same_session_waits_for_release() {
        let map = Arc::new(SessionLockMap::new());
        let holding = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let m1 = map.clone();
        let h1 = holding.clone();
        let guard_task = tokio::spawn(async move {
            let _g = m1.acquire("s1").await;
            h1.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            h1.store(false, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(holding.load(Ordering::SeqCst));

        let m2 = map.clone();
        let h2 = holding.clone();
        let waiter = tokio::spawn(async move {
            let _g = m2.acquire("s1").await;
            assert!(!h2.load(Ordering::SeqCst));
        });

        guard_task.await.unwrap();
        waiter.await.unwrap();
    }
}
