//! Unbounded FIFO channel with a race-free pending-item count.
//!
//! The count is an atomic maintained alongside the underlying queue:
//! incremented before an item becomes visible to `pop`, decremented after an
//! item is removed. It can therefore briefly over-count an in-flight push but
//! never goes negative and never drifts from actual occupancy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;

/// The other side of the channel is gone: all senders dropped (for `pop`) or
/// the receiver dropped (for `push`). Terminal; used for orderly shutdown
/// instead of blocking forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel closed")]
pub struct ChannelClosed;

/// Create a counted channel. Unbounded: no backpressure at this layer.
pub fn counted_channel<T>() -> (CountedSender<T>, CountedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        CountedSender {
            tx,
            pending: pending.clone(),
        },
        CountedReceiver { rx, pending },
    )
}

/// Shared, non-blocking view of a channel's pending-item count.
#[derive(Clone)]
pub struct PendingCount(Arc<AtomicUsize>);

impl PendingCount {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CountedSender<T> {
    tx: mpsc::UnboundedSender<T>,
    pending: Arc<AtomicUsize>,
}

// Manual impl: T need not be Clone.
impl<T> Clone for CountedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T> CountedSender<T> {
    /// Enqueue an item. The pending count is incremented before the item is
    /// handed to the queue, and rolled back if the receiver is gone.
    pub fn push(&self, item: T) -> Result<(), ChannelClosed> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(item) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(ChannelClosed)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> PendingCount {
        PendingCount(self.pending.clone())
    }
}

pub struct CountedReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> CountedReceiver<T> {
    /// Await the next item in FIFO order. Resolves `Err(ChannelClosed)` once
    /// every sender is dropped and the queue is drained. Cancel-safe: no item
    /// is lost if the future is dropped before completion.
    pub async fn pop(&mut self) -> Result<T, ChannelClosed> {
        match self.rx.recv().await {
            Some(item) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Ok(item)
            }
            None => Err(ChannelClosed),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> PendingCount {
        PendingCount(self.pending.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order() {
        let (tx, mut rx) = counted_channel();
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        tx.push(3).unwrap();
        assert_eq!(rx.pop().await, Ok(1));
        assert_eq!(rx.pop().await, Ok(2));
        assert_eq!(rx.pop().await, Ok(3));
    }

    #[tokio::test]
    async fn length_tracks_push_and_pop() {
        let (tx, mut rx) = counted_channel();
        assert_eq!(tx.len(), 0);
        tx.push("a").unwrap();
        tx.push("b").unwrap();
        assert_eq!(tx.len(), 2);
        assert_eq!(rx.len(), 2);
        rx.pop().await.unwrap();
        assert_eq!(rx.len(), 1);
        rx.pop().await.unwrap();
        assert_eq!(rx.len(), 0);
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn pop_on_closed_channel_unblocks() {
        let (tx, mut rx) = counted_channel::<u32>();
        let waiter = tokio::spawn(async move { rx.pop().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(tx);
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pop should unblock promptly")
            .unwrap();
        assert_eq!(got, Err(ChannelClosed));
    }

    #[tokio::test]
    async fn push_after_receiver_dropped_fails_and_count_stays_clean() {
        let (tx, rx) = counted_channel::<u32>();
        drop(rx);
        assert_eq!(tx.push(1), Err(ChannelClosed));
        assert_eq!(tx.len(), 0);
    }

    #[tokio::test]
    async fn drained_closed_channel_reports_closed() {
        let (tx, mut rx) = counted_channel();
        tx.push(7).unwrap();
        drop(tx);
        // Items pushed before closure are still delivered.
        assert_eq!(rx.pop().await, Ok(7));
        assert_eq!(rx.pop().await, Err(ChannelClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_count_never_negative_and_balances() {
        const PER_TASK: usize = 500;
        const TASKS: usize = 4;

        let (tx, mut rx) = counted_channel();
        let observer = tx.pending();

        let mut producers = Vec::new();
        for t in 0..TASKS {
            let tx = tx.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..PER_TASK {
                    tx.push(t * PER_TASK + i).unwrap();
                    if i % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }

        let watcher = {
            let observer = observer.clone();
            tokio::spawn(async move {
                // usize cannot go negative, but a broken ordering would show
                // up as a wildly over-large value after wraparound.
                for _ in 0..200 {
                    assert!(observer.get() <= TASKS * PER_TASK);
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut received = 0usize;
        while received < TASKS * PER_TASK {
            rx.pop().await.unwrap();
            received += 1;
        }

        for p in producers {
            p.await.unwrap();
        }
        watcher.await.unwrap();
        assert_eq!(observer.get(), 0);
    }
}
