//! Stable priority queue
//!
//! Entries are ordered by `(priority, sequence)` ascending. The sequence is a
//! monotonic counter assigned at push time, so entries sharing a priority pop
//! in submission order. Requeued entries go ahead of their priority band.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::QueueResult;
use crate::item::QueueItem;
use crate::queue::{JobQueue, QueueKind};
use crate::wait::pop_with;

/// Heap entry. `Ord` is reversed so the max-heap pops the smallest key.
#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    pub(crate) priority: i64,
    pub(crate) sequence: u64,
    /// Returned after an undelivered pop
    pub(crate) front: bool,
    pub(crate) item: QueueItem,
}

impl QueueEntry {
    fn key(&self) -> (i64, bool, u64) {
        (self.priority, !self.front, self.sequence)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Heap plus sequence counter; shared with the journaled queue
#[derive(Debug, Default)]
pub(crate) struct PriorityState {
    heap: BinaryHeap<QueueEntry>,
    next_sequence: u64,
}

impl PriorityState {
    pub(crate) fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Insert an entry whose sequence was assigned elsewhere (journal replay)
    pub(crate) fn restore(&mut self, entry: QueueEntry) {
        self.next_sequence = self.next_sequence.max(entry.sequence + 1);
        self.heap.push(entry);
    }

    pub(crate) fn push(&mut self, item: QueueItem, priority: i64, front: bool) -> u64 {
        let sequence = self.next_sequence();
        self.heap.push(QueueEntry {
            priority,
            sequence,
            front,
            item,
        });
        sequence
    }

    pub(crate) fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub(crate) fn peek_entry(&self) -> Option<&QueueEntry> {
        self.heap.peek()
    }

    /// Take out every entry whose item matches `remove`
    pub(crate) fn extract(&mut self, mut remove: impl FnMut(&QueueItem) -> bool) -> Vec<QueueEntry> {
        let (removed, kept): (Vec<QueueEntry>, Vec<QueueEntry>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|entry| remove(&entry.item));
        self.heap = BinaryHeap::from(kept);
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Live entries in pop order
    pub(crate) fn ordered(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self.heap.iter().cloned().collect();
        entries.sort_by_key(QueueEntry::key);
        entries
    }

    pub(crate) fn peek(&self, index: usize) -> Option<QueueItem> {
        if index == 0 {
            return self.heap.peek().map(|entry| entry.item.clone());
        }
        self.ordered().into_iter().nth(index).map(|entry| entry.item)
    }
}

/// In-memory stable priority queue
#[derive(Default)]
pub struct PriorityQueue {
    state: Mutex<PriorityState>,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for PriorityQueue {
    async fn push_with_priority(&self, item: QueueItem, priority: i64) -> QueueResult<()> {
        self.state.lock().push(item, priority, false);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Option<Duration>) -> QueueResult<QueueItem> {
        Ok(self.pop_entry(timeout).await?.0)
    }

    async fn pop_entry(&self, timeout: Option<Duration>) -> QueueResult<(QueueItem, i64)> {
        pop_with(&self.notify, timeout, || {
            Ok(self
                .state
                .lock()
                .pop()
                .map(|entry| (entry.item, entry.priority)))
        })
        .await
    }

    async fn requeue(&self, item: QueueItem, priority: i64) -> QueueResult<()> {
        self.state.lock().push(item, priority, true);
        self.notify.notify_one();
        Ok(())
    }

    async fn purge_sentinels(&self, marker: &str) -> QueueResult<usize> {
        Ok(self
            .state
            .lock()
            .extract(|item| item.is_sentinel_for(marker))
            .len())
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.state.lock().len())
    }

    async fn peek(&self, index: usize) -> QueueResult<Option<QueueItem>> {
        Ok(self.state.lock().peek(index))
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RETIRE_PRIORITY;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn marker(item: QueueItem) -> String {
        match item {
            QueueItem::Sentinel { marker } => marker,
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_priority_then_submission_order() {
        let queue = PriorityQueue::new();
        queue.push_with_priority(QueueItem::sentinel("a"), 5).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("b"), 1).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("c"), 5).await.unwrap();

        let mut popped = Vec::new();
        for _ in 0..3 {
            popped.push(marker(queue.pop(None).await.unwrap()));
        }
        assert_eq!(popped, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_peek_follows_pop_order() {
        let queue = PriorityQueue::new();
        queue.push_with_priority(QueueItem::sentinel("late"), RETIRE_PRIORITY).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("x"), 3).await.unwrap();
        queue.push(QueueItem::sentinel("y")).await.unwrap();

        assert_eq!(queue.peek(0).await.unwrap(), Some(QueueItem::sentinel("y")));
        assert_eq!(queue.peek(1).await.unwrap(), Some(QueueItem::sentinel("x")));
        assert_eq!(queue.peek(2).await.unwrap(), Some(QueueItem::sentinel("late")));
        assert_eq!(queue.peek(3).await.unwrap(), None);
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_requeued_item_leads_its_band() {
        let queue = PriorityQueue::new();
        queue.push_with_priority(QueueItem::sentinel("a"), 2).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("b"), 2).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("urgent"), 1).await.unwrap();

        let (item, priority) = queue.pop_entry(None).await.unwrap();
        assert_eq!((item.clone(), priority), (QueueItem::sentinel("urgent"), 1));
        let (taken, taken_priority) = queue.pop_entry(None).await.unwrap();
        assert_eq!(taken_priority, 2);

        queue.requeue(taken, taken_priority).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("c"), 2).await.unwrap();

        let mut popped = Vec::new();
        for _ in 0..3 {
            popped.push(marker(queue.pop(None).await.unwrap()));
        }
        assert_eq!(popped, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_purge_sentinels_keeps_other_items() {
        let queue = PriorityQueue::new();
        queue.push(QueueItem::sentinel("keep")).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("-STOP-"), RETIRE_PRIORITY).await.unwrap();
        queue.push(QueueItem::sentinel("also-keep")).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("-STOP-"), RETIRE_PRIORITY).await.unwrap();

        assert_eq!(queue.purge_sentinels("-STOP-").await.unwrap(), 2);
        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(marker(queue.pop(None).await.unwrap()), "keep");
        assert_eq!(marker(queue.pop(None).await.unwrap()), "also-keep");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pops_never_duplicate() {
        let queue = Arc::new(PriorityQueue::new());
        for i in 0..500 {
            queue
                .push_with_priority(QueueItem::sentinel(i.to_string()), i % 7)
                .await
                .unwrap();
        }

        let mut consumers = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Ok(item) = queue.pop(Some(Duration::from_millis(20))).await {
                    seen.push(marker(item));
                }
                seen
            }));
        }

        let mut all = HashSet::new();
        let mut total = 0;
        for consumer in consumers {
            for m in consumer.await.unwrap() {
                total += 1;
                all.insert(m);
            }
        }
        assert_eq!(total, 500);
        assert_eq!(all.len(), 500);
    }
}
