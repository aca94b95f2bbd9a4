//! Result store and result destinations

use async_trait::async_trait;
use conveyor_core::{Outcome, ResultEntry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{QueueError, QueueResult};
use crate::item::QueueItem;
use crate::queue::JobQueue;

/// Anything that accepts `store[id] = outcome` writes
#[async_trait]
pub trait ResultMapping: Send + Sync {
    async fn set(&self, entry: ResultEntry) -> QueueResult<()>;
}

/// Shared task id to outcome mapping.
///
/// A write is visible to every reader as soon as `set` returns. Writes to
/// distinct ids never conflict; a second write to the same id replaces the
/// first.
#[derive(Default)]
pub struct ResultStore {
    entries: RwLock<HashMap<String, Outcome>>,
    written: Notify,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome, returning the one it replaced
    pub fn insert(&self, task_id: impl Into<String>, outcome: Outcome) -> Option<Outcome> {
        let previous = self.entries.write().insert(task_id.into(), outcome);
        self.written.notify_waiters();
        previous
    }

    pub fn get(&self, task_id: &str) -> Option<Outcome> {
        self.entries.read().get(task_id).cloned()
    }

    /// Wait for the outcome of `task_id`.
    ///
    /// Returns [`QueueError::NotAvailable`] if `timeout` elapses first.
    pub async fn fetch(&self, task_id: &str, timeout: Option<Duration>) -> QueueResult<Outcome> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let written = self.written.notified();
            tokio::pin!(written);
            written.as_mut().enable();

            if let Some(outcome) = self.get(task_id) {
                return Ok(outcome);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, written).await.is_err() {
                        return self
                            .get(task_id)
                            .ok_or_else(|| QueueError::NotAvailable(task_id.to_string()));
                    }
                }
                None => written.await,
            }
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.read().contains_key(task_id)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of every entry
    pub fn snapshot(&self) -> Vec<ResultEntry> {
        self.entries
            .read()
            .iter()
            .map(|(id, outcome)| ResultEntry::new(id.clone(), outcome.clone()))
            .collect()
    }
}

#[async_trait]
impl ResultMapping for ResultStore {
    async fn set(&self, entry: ResultEntry) -> QueueResult<()> {
        self.insert(entry.task_id, entry.outcome);
        Ok(())
    }
}

/// Where a worker records outcomes
#[derive(Clone)]
pub enum ResultDestination {
    /// Keyed write into a result mapping
    Mapping(Arc<dyn ResultMapping>),
    /// Push onto a results queue
    Queue(Arc<dyn JobQueue>),
}

impl ResultDestination {
    pub async fn record(&self, entry: ResultEntry) -> QueueResult<()> {
        match self {
            ResultDestination::Mapping(mapping) => mapping.set(entry).await,
            ResultDestination::Queue(queue) => queue.push(QueueItem::results(vec![entry])).await,
        }
    }
}

impl From<Arc<ResultStore>> for ResultDestination {
    fn from(store: Arc<ResultStore>) -> Self {
        ResultDestination::Mapping(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::FifoQueue;
    use conveyor_core::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = ResultStore::new();
        assert!(store.insert("t1", Outcome::value(json!(1))).is_none());
        assert_eq!(store.get("t1"), Some(Outcome::value(json!(1))));
        assert!(store.contains("t1"));
        assert_eq!(store.keys(), vec!["t1".to_string()]);

        let replaced = store.insert("t1", Outcome::error(ErrorKind::ExecutionFailed, "x"));
        assert_eq!(replaced, Some(Outcome::value(json!(1))));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_waits_for_write() {
        let store = Arc::new(ResultStore::new());
        let reader = {
            let store = store.clone();
            tokio::spawn(async move { store.fetch("later", Some(Duration::from_secs(5))).await })
        };

        tokio::task::yield_now().await;
        store.insert("later", Outcome::value(json!("done")));

        assert_eq!(reader.await.unwrap().unwrap(), Outcome::value(json!("done")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_times_out() {
        let store = ResultStore::new();
        let result = store.fetch("never", Some(Duration::from_millis(100))).await;
        assert!(matches!(result, Err(QueueError::NotAvailable(id)) if id == "never"));
    }

    #[tokio::test]
    async fn test_destinations_share_contract() {
        let store = Arc::new(ResultStore::new());
        let mapping = ResultDestination::from(store.clone());
        mapping
            .record(ResultEntry::new("a", Outcome::value(json!(1))))
            .await
            .unwrap();
        assert_eq!(store.get("a"), Some(Outcome::value(json!(1))));

        let queue = Arc::new(FifoQueue::new());
        let queued = ResultDestination::Queue(queue.clone());
        queued
            .record(ResultEntry::new("b", Outcome::value(json!(2))))
            .await
            .unwrap();
        assert_eq!(
            queue.pop(None).await.unwrap(),
            QueueItem::results(vec![ResultEntry::new("b", Outcome::value(json!(2)))])
        );
    }
}
