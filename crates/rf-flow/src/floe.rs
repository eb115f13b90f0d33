//! The edge queue: a bounded FIFO between one
//! upstream and one downstream node. `put`/`get` both suspend and both
//! honor cancellation, unblocking with [`FloeError::Cancelled`] rather than
//! ever silently dropping a message outside cancellation/deadline.

use tokio::sync::mpsc;

use crate::cancel::CancelToken;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FloeError {
    #[error("cancelled")]
    Cancelled,
    #[error("floe closed")]
    Closed,
}

/// Either an unbounded or a fixed-capacity FIFO.
pub enum Capacity {
    Bounded(usize),
    Unbounded,
}

pub struct FloeSender<T> {
    tx: mpsc::Sender<T>,
    unbounded_tx: Option<mpsc::UnboundedSender<T>>,
}

pub struct FloeReceiver<T> {
    rx: Option<mpsc::Receiver<T>>,
    unbounded_rx: Option<mpsc::UnboundedReceiver<T>>,
}

/// Construct one Floe: a connected `(sender, receiver)` pair with FIFO
/// ordering between this single producer-consumer pair.
pub fn floe<T>(capacity: Capacity) -> (FloeSender<T>, FloeReceiver<T>) {
    match capacity {
        Capacity::Bounded(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (FloeSender { tx, unbounded_tx: None }, FloeReceiver { rx: Some(rx), unbounded_rx: None })
        }
        Capacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (FloeSender { tx: dummy_sender(), unbounded_tx: Some(tx) }, FloeReceiver { rx: None, unbounded_rx: Some(rx) })
        }
    }
}

/// A throwaway bounded channel used only to give `FloeSender` a uniform
/// `tx` field when the unbounded variant is active; never sent on.
fn dummy_sender<T>() -> mpsc::Sender<T> {
    mpsc::channel(1).0
}

impl<T> FloeSender<T> {
    /// Suspend until there is room, then enqueue `value`. Cancellation on
    /// `token` unblocks the wait with `FloeError::Cancelled`.
    pub async fn put(&self, value: T, token: &CancelToken) -> Result<(), FloeError> {
        if let Some(unbounded) = &self.unbounded_tx {
            return unbounded.send(value).map_err(|_| FloeError::Closed);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(FloeError::Cancelled),
            result = self.tx.send(value) => result.map_err(|_| FloeError::Closed),
        }
    }
}

impl<T> Clone for FloeSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), unbounded_tx: self.unbounded_tx.clone() }
    }
}

impl<T> FloeReceiver<T> {
    /// Suspend until a value is available, then dequeue it. Cancellation on
    /// `token` unblocks the wait with `FloeError::Cancelled`.
    pub async fn get(&mut self, token: &CancelToken) -> Result<T, FloeError> {
        if let Some(rx) = &mut self.unbounded_rx {
            return tokio::select! {
                biased;
                _ = token.cancelled() => Err(FloeError::Cancelled),
                value = rx.recv() => value.ok_or(FloeError::Closed),
            };
        }
        let rx = self.rx.as_mut().expect("bounded receiver present when not unbounded");
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(FloeError::Cancelled),
            value = rx.recv() => value.ok_or(FloeError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_ordering_is_preserved() {
        let (tx, mut rx) = floe::<u32>(Capacity::Bounded(4));
        let token = CancelToken::new();
        tx.put(1, &token).await.unwrap();
        tx.put(2, &token).await.unwrap();
        tx.put(3, &token).await.unwrap();
        assert_eq!(rx.get(&token).await.unwrap(), 1);
        assert_eq!(rx.get(&token).await.unwrap(), 2);
        assert_eq!(rx.get(&token).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn put_blocks_when_full_until_consumer_drains() {
        let (tx, mut rx) = floe::<u32>(Capacity::Bounded(1));
        let token = CancelToken::new();
        tx.put(1, &token).await.unwrap();

        let tx2 = tx.clone();
        let token2 = token.clone();
        let putter = tokio::spawn(async move { tx2.put(2, &token2).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!putter.is_finished());

        assert_eq!(rx.get(&token).await.unwrap(), 1);
        putter.await.unwrap().unwrap();
        assert_eq!(rx.get(&token).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn get_is_unblocked_by_cancellation() {
        let (_tx, mut rx) = floe::<u32>(Capacity::Bounded(1));
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { rx.get(&token).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        token.cancel();
        let result = waiter.await.unwrap();
        assert_eq!(result, Err(FloeError::Cancelled));
    }

    #[tokio::test]
    async fn unbounded_floe_never_blocks_producer() {
        let (tx, mut rx) = floe::<u32>(Capacity::Unbounded);
        let token = CancelToken::new();
        for i in 0..1000 {
            tx.put(i, &token).await.unwrap();
        }
        assert_eq!(rx.get(&token).await.unwrap(), 0);
    }
}
