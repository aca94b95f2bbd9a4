//! Plain FIFO queue

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::QueueResult;
use crate::item::QueueItem;
use crate::queue::{JobQueue, QueueKind};
use crate::wait::pop_with;

/// Unbounded FIFO queue; priorities are ignored
#[derive(Default)]
pub struct FifoQueue {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for FifoQueue {
    async fn push_with_priority(&self, item: QueueItem, _priority: i64) -> QueueResult<()> {
        self.items.lock().push_back(item);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Option<Duration>) -> QueueResult<QueueItem> {
        pop_with(&self.notify, timeout, || Ok(self.items.lock().pop_front())).await
    }

    async fn requeue(&self, item: QueueItem, _priority: i64) -> QueueResult<()> {
        self.items.lock().push_front(item);
        self.notify.notify_one();
        Ok(())
    }

    async fn purge_sentinels(&self, marker: &str) -> QueueResult<usize> {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|item| !item.is_sentinel_for(marker));
        Ok(before - items.len())
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.items.lock().len())
    }

    async fn peek(&self, index: usize) -> QueueResult<Option<QueueItem>> {
        Ok(self.items.lock().get(index).cloned())
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Fifo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = FifoQueue::new();
        for marker in ["a", "b", "c"] {
            queue.push(QueueItem::sentinel(marker)).await.unwrap();
        }

        assert_eq!(queue.len().await.unwrap(), 3);
        assert_eq!(queue.peek(1).await.unwrap(), Some(QueueItem::sentinel("b")));
        assert_eq!(queue.peek(7).await.unwrap(), None);

        for marker in ["a", "b", "c"] {
            assert_eq!(queue.pop(None).await.unwrap(), QueueItem::sentinel(marker));
        }
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_requeue_goes_to_the_front() {
        let queue = FifoQueue::new();
        queue.push(QueueItem::sentinel("a")).await.unwrap();
        queue.push(QueueItem::sentinel("b")).await.unwrap();

        let taken = queue.pop(None).await.unwrap();
        queue.requeue(taken, 0).await.unwrap();
        assert_eq!(queue.pop(None).await.unwrap(), QueueItem::sentinel("a"));

        queue.push(QueueItem::sentinel("-STOP-")).await.unwrap();
        assert_eq!(queue.purge_sentinels("-STOP-").await.unwrap(), 1);
        assert_eq!(queue.pop(None).await.unwrap(), QueueItem::sentinel("b"));
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_timeout_reports_empty() {
        let queue = FifoQueue::new();
        let result = queue.pop(Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Err(QueueError::Empty)));
    }

    #[tokio::test]
    async fn test_blocked_pop_wakes_on_push() {
        let queue = Arc::new(FifoQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(None).await })
        };

        tokio::task::yield_now().await;
        queue.push(QueueItem::sentinel("wake")).await.unwrap();

        let item = consumer.await.unwrap().unwrap();
        assert_eq!(item, QueueItem::sentinel("wake"));
    }
}
