use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Scheduling priority of queued work.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
}
impl Priority {
    /// Order in which lanes are drained.
    const BY_URGENCY: [Self; 3] = [Self::High, Self::Normal, Self::Low];

    fn lane(self) -> usize {
        self as usize
    }
}

/// A blocking, priority-ordered work queue.
///
/// Each priority has its own FIFO lane. A semaphore holds exactly one permit
/// per pending item, so [`PriorityQueue::dequeue`] only ever wakes up when at
/// least one lane is non-empty; it then takes from the most urgent lane that
/// has something in it. Enqueueing never blocks and never awaits.
pub struct PriorityQueue<T> {
    lanes: Mutex<[VecDeque<T>; 3]>,
    pending: Semaphore,
}
impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new([VecDeque::new(), VecDeque::new(), VecDeque::new()]),
            pending: Semaphore::new(0),
        }
    }

    // Lanes are only ever pushed to or popped from while locked, so they stay
    // consistent even if the lock is poisoned.
    fn lanes(&self) -> MutexGuard<'_, [VecDeque<T>; 3]> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an item to the back of its priority lane.
    pub fn enqueue(&self, item: T, priority: Priority) {
        self.lanes()[priority.lane()].push_back(item);
        self.pending.add_permits(1);
    }

    /// Add an item unless an equal one is already waiting in any lane.
    ///
    /// Returns `false` if it was skipped. Items already handed out by
    /// [`dequeue`](PriorityQueue::dequeue) don't count.
    pub fn enqueue_unique(&self, item: T, priority: Priority) -> bool
    where
        T: PartialEq,
    {
        let mut lanes = self.lanes();
        if lanes.iter().any(|lane| lane.contains(&item)) {
            return false;
        }
        lanes[priority.lane()].push_back(item);
        drop(lanes);
        self.pending.add_permits(1);
        true
    }

    /// Wait for the most urgent pending item.
    ///
    /// Returns `None` once `cancel` fires. Items still queued at that point
    /// are left in place.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<T> {
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            // The semaphore is never closed.
            permit = self.pending.acquire() => permit.ok(),
        };
        acquired?.forget();
        let mut lanes = self.lanes();
        Priority::BY_URGENCY.iter().find_map(|priority| lanes[priority.lane()].pop_front())
    }

    /// Number of pending items across all priorities.
    pub fn len(&self) -> usize {
        self.lanes().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_higher_priority_dequeued_first() {
        let queue = PriorityQueue::new();
        let cancel = CancellationToken::new();
        queue.enqueue("low", Priority::Low);
        queue.enqueue("normal", Priority::Normal);
        queue.enqueue("high", Priority::High);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(&cancel).await, Some("high"));
        assert_eq!(queue.dequeue(&cancel).await, Some("normal"));
        assert_eq!(queue.dequeue(&cancel).await, Some("low"));
        assert!(queue.is_empty());
    }

    #[rstest]
    #[case(Priority::Low)]
    #[case(Priority::Normal)]
    #[case(Priority::High)]
    #[tokio::test]
    async fn test_fifo_within_priority(#[case] priority: Priority) {
        let queue = PriorityQueue::new();
        let cancel = CancellationToken::new();
        for i in 0..5 {
            queue.enqueue(i, priority);
        }
        for i in 0..5 {
            assert_eq!(queue.dequeue(&cancel).await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_interleaved_priorities() {
        let queue = PriorityQueue::new();
        let cancel = CancellationToken::new();
        queue.enqueue(1, Priority::Low);
        queue.enqueue(2, Priority::High);
        assert_eq!(queue.dequeue(&cancel).await, Some(2));
        queue.enqueue(3, Priority::Normal);
        queue.enqueue(4, Priority::Low);
        assert_eq!(queue.dequeue(&cancel).await, Some(3));
        assert_eq!(queue.dequeue(&cancel).await, Some(1));
        assert_eq!(queue.dequeue(&cancel).await, Some(4));
    }

    #[tokio::test]
    async fn test_enqueue_unique_skips_waiting_duplicates() {
        let queue = PriorityQueue::new();
        let cancel = CancellationToken::new();
        assert!(queue.enqueue_unique("scan", Priority::Low));
        assert!(!queue.enqueue_unique("scan", Priority::High));
        assert!(queue.enqueue_unique("other", Priority::Low));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(&cancel).await, Some("scan"));
        // Once taken, the same item can be queued again.
        assert!(queue.enqueue_unique("scan", Priority::Low));
        assert_eq!(queue.dequeue(&cancel).await, Some("other"));
        assert_eq!(queue.dequeue(&cancel).await, Some("scan"));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_waits_for_work() {
        let queue = Arc::new(PriorityQueue::new());
        let cancel = CancellationToken::new();
        let consumer = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(&cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!consumer.is_finished());
        queue.enqueue("late", Priority::Normal);
        assert_eq!(consumer.await.unwrap(), Some("late"));
    }

    #[tokio::test]
    async fn test_cancelled_dequeue_returns_none() {
        let queue = Arc::new(PriorityQueue::<u8>::new());
        let cancel = CancellationToken::new();
        let consumer = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(&cancel).await })
        };
        cancel.cancel();
        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_items_queued() {
        let queue = PriorityQueue::new();
        let cancel = CancellationToken::new();
        queue.enqueue("kept", Priority::Low);
        cancel.cancel();
        assert_eq!(queue.dequeue(&cancel).await, None);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue(&CancellationToken::new()).await, Some("kept"));
    }
}
