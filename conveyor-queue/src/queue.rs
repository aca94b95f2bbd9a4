//! The queue contract shared by local queues and remote proxies

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{QueueError, QueueResult};
use crate::item::QueueItem;

/// Priority used by `push`; lower values are more urgent
pub const DEFAULT_PRIORITY: i64 = 0;

/// Priority for retirement sentinels, behind any ordinary work
pub const RETIRE_PRIORITY: i64 = 9_999_999;

/// Queue implementation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Fifo,
    Priority,
    Journaled,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Fifo => write!(f, "fifo"),
            QueueKind::Priority => write!(f, "priority"),
            QueueKind::Journaled => write!(f, "journaled"),
        }
    }
}

/// Multi-producer, multi-consumer job queue.
///
/// `pop` never hands the same item to two callers. A timeout of `None` waits
/// indefinitely; an elapsed timeout yields [`QueueError::Empty`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push_with_priority(&self, item: QueueItem, priority: i64) -> QueueResult<()>;

    async fn push(&self, item: QueueItem) -> QueueResult<()> {
        self.push_with_priority(item, DEFAULT_PRIORITY).await
    }

    async fn pop(&self, timeout: Option<Duration>) -> QueueResult<QueueItem>;

    /// Pop, also reporting the priority the item was pushed with
    async fn pop_entry(&self, timeout: Option<Duration>) -> QueueResult<(QueueItem, i64)> {
        Ok((self.pop(timeout).await?, DEFAULT_PRIORITY))
    }

    /// Put back an item that was popped but never delivered. It is served
    /// before everything already waiting at `priority`.
    async fn requeue(&self, item: QueueItem, priority: i64) -> QueueResult<()> {
        self.push_with_priority(item, priority).await
    }

    async fn len(&self) -> QueueResult<usize>;

    async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Item at `index` in pop order, without removing it
    async fn peek(&self, _index: usize) -> QueueResult<Option<QueueItem>> {
        Err(QueueError::Unsupported("peek".to_string()))
    }

    /// Remove every sentinel carrying `marker`, returning how many went
    async fn purge_sentinels(&self, _marker: &str) -> QueueResult<usize> {
        Err(QueueError::Unsupported("purge_sentinels".to_string()))
    }

    /// Resolve calls left behind by cancelled callers. A remote proxy hands
    /// back any item a cancelled pop had already taken; local queues have
    /// nothing to do.
    async fn settle(&self) -> QueueResult<()> {
        Ok(())
    }

    fn kind(&self) -> QueueKind;
}
