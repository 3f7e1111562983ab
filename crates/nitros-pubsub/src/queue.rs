//! Bounded multi-producer queue with an async consumer.
//!
//! Producers never block: when the queue is full the [`OverflowPolicy`]
//! either evicts the oldest item or refuses the new one.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;

/// What happens when a producer pushes into a full queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room.
    #[default]
    DropOldest,
    /// Refuse the new item.
    Reject,
}

/// Outcome of [`BoundedQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Queued, but an older item was evicted.
    Displaced,
    /// Not queued; the queue was full.
    Rejected,
    /// Not queued; the queue is closed.
    Closed,
}

impl Enqueue {
    /// The pushed item is in the queue.
    pub fn accepted(self) -> bool {
        matches!(self, Enqueue::Queued | Enqueue::Displaced)
    }

    /// Some item was lost to overflow.
    pub fn lost(self) -> bool {
        matches!(self, Enqueue::Displaced | Enqueue::Rejected)
    }
}

#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: ArrayQueue<T>,
    policy: OverflowPolicy,
    ready: Notify,
    closed: AtomicBool,
}

impl<T> BoundedQueue<T> {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            items: ArrayQueue::new(capacity.max(1)),
            policy,
            ready: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, item: T) -> Enqueue {
        if self.is_closed() {
            return Enqueue::Closed;
        }
        let outcome = match self.policy {
            OverflowPolicy::DropOldest => match self.items.force_push(item) {
                None => Enqueue::Queued,
                Some(_evicted) => Enqueue::Displaced,
            },
            OverflowPolicy::Reject => match self.items.push(item) {
                Ok(()) => Enqueue::Queued,
                Err(_) => return Enqueue::Rejected,
            },
        };
        self.ready.notify_one();
        outcome
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.pop()
    }

    /// Wait for the next item. Returns `None` once the queue is closed and
    /// drained. Cancel safe: an item is only removed when this resolves.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.items.pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Refuse further pushes and wake the consumer. Queued items can still
    /// be drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_waiters();
        self.ready.notify_one();
    }

    /// Discard everything queued. Returns how many items were dropped.
    pub fn clear(&self) -> usize {
        let mut n = 0;
        while self.items.pop().is_some() {
            n += 1;
        }
        n
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn drop_oldest_keeps_newest() {
        let q = BoundedQueue::new(2, OverflowPolicy::DropOldest);
        assert_eq!(q.push(1), Enqueue::Queued);
        assert_eq!(q.push(2), Enqueue::Queued);
        assert_eq!(q.push(3), Enqueue::Displaced);
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn reject_keeps_oldest() {
        let q = BoundedQueue::new(1, OverflowPolicy::Reject);
        assert_eq!(q.push("a"), Enqueue::Queued);
        assert_eq!(q.push("b"), Enqueue::Rejected);
        assert_eq!(q.try_pop(), Some("a"));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let q = BoundedQueue::<u8>::new(0, OverflowPolicy::DropOldest);
        assert_eq!(q.capacity(), 1);
    }

    #[test]
    fn closed_queue_refuses_but_drains() {
        let q = BoundedQueue::new(4, OverflowPolicy::DropOldest);
        q.push(1);
        q.close();
        assert_eq!(q.push(2), Enqueue::Closed);
        assert_eq!(q.try_pop(), Some(1));
    }

    #[test]
    fn clear_counts_discarded() {
        let q = BoundedQueue::new(4, OverflowPolicy::DropOldest);
        q.push(1);
        q.push(2);
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let q = Arc::new(BoundedQueue::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(7u32);
        assert_eq!(consumer.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn recv_ends_after_close_and_drain() {
        let q = Arc::new(BoundedQueue::new(4, OverflowPolicy::DropOldest));
        q.push(1u8);
        q.close();
        assert_eq!(q.recv().await, Some(1));
        assert_eq!(q.recv().await, None);
    }

    #[tokio::test]
    async fn close_wakes_waiting_consumer() {
        let q = Arc::new(BoundedQueue::<u8>::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let result = tokio::time::timeout(Duration::from_secs(1), consumer).await;
        assert_eq!(result.unwrap().unwrap(), None);
    }
}
