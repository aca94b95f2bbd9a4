//! Items carried by queues

use conveyor_core::{ResultEntry, TaskPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One queue element.
///
/// Task payloads are kept as raw JSON so a malformed payload still reaches
/// the worker, which records it as a failed task instead of losing it.
/// The sentinel is its own variant, so no function name can be mistaken for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueItem {
    /// A single task
    Task { task: JsonValue },
    /// Several tasks executed in order by one worker
    Batch { tasks: Vec<JsonValue> },
    /// Outcomes pushed onto a results queue
    Results { entries: Vec<ResultEntry> },
    /// Request for the consuming worker to stop
    Sentinel { marker: String },
}

impl QueueItem {
    pub fn task(payload: &TaskPayload) -> Self {
        QueueItem::Task {
            task: payload.to_value(),
        }
    }

    pub fn batch<'a>(payloads: impl IntoIterator<Item = &'a TaskPayload>) -> Self {
        QueueItem::Batch {
            tasks: payloads.into_iter().map(TaskPayload::to_value).collect(),
        }
    }

    pub fn results(entries: Vec<ResultEntry>) -> Self {
        QueueItem::Results { entries }
    }

    pub fn sentinel(marker: impl Into<String>) -> Self {
        QueueItem::Sentinel {
            marker: marker.into(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, QueueItem::Sentinel { .. })
    }

    /// Sentinel carrying exactly `marker`
    pub fn is_sentinel_for(&self, marker: &str) -> bool {
        matches!(self, QueueItem::Sentinel { marker: m } if m == marker)
    }

    /// Number of tasks this item represents
    pub fn task_count(&self) -> usize {
        match self {
            QueueItem::Task { .. } => 1,
            QueueItem::Batch { tasks } => tasks.len(),
            QueueItem::Results { .. } | QueueItem::Sentinel { .. } => 0,
        }
    }
}

impl From<TaskPayload> for QueueItem {
    fn from(payload: TaskPayload) -> Self {
        QueueItem::task(&payload)
    }
}
