//! Bounded in-memory work queue with a configurable overflow policy.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::options::QueueFullMode;

#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// The item being written was discarded (drop-newest under a full queue).
    DroppedNewest,
    /// The oldest queued item was discarded to make room.
    DroppedOldest,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("queue write cancelled")]
    Cancelled,
}

/// MPSC queue bounded at `capacity`.
///
/// Under the `Wait` policy a full queue suspends the writer, which is the
/// backpressure path: a slow drain slows the producers. The drop policies
/// trade loss for latency instead.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    mode: QueueFullMode,
    not_empty: Notify,
    not_full: Notify,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, mode: QueueFullMode) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            mode,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Write one item, applying the overflow policy when full.
    pub async fn push(&self, item: T, cancel: &CancellationToken) -> Result<PushOutcome, QueueError> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    drop(inner);
                    self.not_full.notify_one();
                    return Err(QueueError::Closed);
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(item);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(PushOutcome::Enqueued);
                }
                match self.mode {
                    QueueFullMode::Wait => {}
                    QueueFullMode::DropNewest => return Ok(PushOutcome::DroppedNewest),
                    QueueFullMode::DropOldest => {
                        inner.items.pop_front();
                        inner.items.push_back(item);
                        drop(inner);
                        self.not_empty.notify_one();
                        return Ok(PushOutcome::DroppedOldest);
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = self.not_full.notified() => {}
            }
        }
    }

    /// Take the next item, waiting while empty. `None` once the queue is
    /// closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if inner.closed {
                    drop(inner);
                    self.not_empty.notify_one();
                    return None;
                }
            }
            self.not_empty.notified().await;
        }
    }

    /// Refuse further writes. Already-queued items remain poppable.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        self.not_empty.notify_one();
        self.not_full.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn wait_mode_blocks_writers_until_drained() {
        let queue = Arc::new(BoundedQueue::new(2, QueueFullMode::Wait));
        let completed = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let mut writers = Vec::new();
        for i in 0..5u32 {
            let queue = Arc::clone(&queue);
            let completed = Arc::clone(&completed);
            let cancel = cancel.clone();
            writers.push(tokio::spawn(async move {
                queue.push(i, &cancel).await.unwrap();
                completed.fetch_add(1, Ordering::SeqCst);
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 2, "only the first two fit");
        assert_eq!(queue.len(), 2);

        let mut drained = Vec::new();
        for _ in 0..5 {
            drained.push(queue.pop().await.unwrap());
        }
        for writer in writers {
            writer.await.unwrap();
        }
        assert_eq!(completed.load(Ordering::SeqCst), 5);
        drained.sort_unstable();
        assert_eq!(drained, vec![0, 1, 2, 3, 4], "no item is lost");
    }

    #[tokio::test]
    async fn drop_newest_discards_the_incoming_item() {
        let queue = BoundedQueue::new(2, QueueFullMode::DropNewest);
        let cancel = CancellationToken::new();

        assert_eq!(queue.push(1, &cancel).await.unwrap(), PushOutcome::Enqueued);
        assert_eq!(queue.push(2, &cancel).await.unwrap(), PushOutcome::Enqueued);
        assert_eq!(queue.push(3, &cancel).await.unwrap(), PushOutcome::DroppedNewest);

        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn drop_oldest_discards_the_queued_head() {
        let queue = BoundedQueue::new(2, QueueFullMode::DropOldest);
        let cancel = CancellationToken::new();

        queue.push(1, &cancel).await.unwrap();
        queue.push(2, &cancel).await.unwrap();
        assert_eq!(queue.push(3, &cancel).await.unwrap(), PushOutcome::DroppedOldest);

        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = BoundedQueue::new(4, QueueFullMode::Wait);
        let cancel = CancellationToken::new();

        queue.push(1, &cancel).await.unwrap();
        queue.close();

        assert_eq!(queue.push(2, &cancel).await.unwrap_err(), QueueError::Closed);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_writer() {
        let queue = Arc::new(BoundedQueue::new(1, QueueFullMode::Wait));
        let cancel = CancellationToken::new();
        queue.push(1, &cancel).await.unwrap();

        let blocked = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.push(2, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err(), QueueError::Closed);
    }

    #[tokio::test]
    async fn cancellation_aborts_a_blocked_writer() {
        let queue = Arc::new(BoundedQueue::new(1, QueueFullMode::Wait));
        let cancel = CancellationToken::new();
        queue.push(1, &cancel).await.unwrap();

        let blocked = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.push(2, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err(), QueueError::Cancelled);
    }
}
