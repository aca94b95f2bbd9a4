//! Worker state machine
//!
//! `Starting -> Running -> (Draining | Terminating) -> Stopped`
//!
//! A running worker loops over `pop -> decode -> invoke -> record`. Popping
//! the poison pill moves it to `Draining`; cancellation of its token moves it
//! to `Terminating` and aborts the current wait. Failures of a single task are
//! recorded as error outcomes and never end the loop.

use conveyor_core::{ErrorKind, FunctionRegistry, Outcome, ResultEntry, Task, TaskError};
use conveyor_queue::{JobQueue, QueueItem, ResultDestination};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ExecutionError, ExecutionResult};

/// Pause after an unexpected queue error before popping again
const ERROR_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Draining,
    Terminating,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Terminating => "terminating",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Sentinel marker that stops this worker
    pub poison_pill: String,
    /// How long one pop waits before the loop checks in again
    pub pop_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poison_pill: "-STOP-".to_string(),
            pop_timeout: Duration::from_secs(1),
        }
    }
}

/// Summary emitted when a worker stops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    /// Tasks taken off the queue and handled, successful or not
    pub processed: u64,
    /// Tasks whose outcome is an error
    pub failed: u64,
    /// State the worker stopped from
    pub final_state: WorkerState,
}

enum Flow {
    Continue,
    Drain,
}

pub struct Worker {
    id: usize,
    registry: Arc<FunctionRegistry>,
    queue: Arc<dyn JobQueue>,
    results: ResultDestination,
    settings: WorkerSettings,
    state: watch::Sender<WorkerState>,
    processed: u64,
    failed: u64,
}

impl Worker {
    pub fn new(
        id: usize,
        registry: Arc<FunctionRegistry>,
        queue: Arc<dyn JobQueue>,
        results: ResultDestination,
        settings: WorkerSettings,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Starting);
        Self {
            id,
            registry,
            queue,
            results,
            settings,
            state,
            processed: 0,
            failed: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(worker_id = self.id, from = %previous, to = %next, "Worker state change");
        }
    }

    /// Run until the poison pill arrives or `cancel` fires.
    ///
    /// Returns an error only when the queue or result destination is lost.
    pub async fn run(mut self, cancel: CancellationToken) -> ExecutionResult<WorkerReport> {
        info!(worker_id = self.id, queue = %self.queue.kind(), "Worker starting");
        self.transition(WorkerState::Running);

        let result = self.run_loop(&cancel).await;
        let final_state = self.state();
        self.transition(WorkerState::Stopped);

        let report = WorkerReport {
            worker_id: self.id,
            processed: self.processed,
            failed: self.failed,
            final_state,
        };

        match result {
            Ok(()) => {
                info!(
                    worker_id = self.id,
                    processed = report.processed,
                    failed = report.failed,
                    final_state = %report.final_state,
                    "Worker stopped"
                );
                Ok(report)
            }
            Err(e) => {
                error!(worker_id = self.id, error = %e, "Worker stopped on error");
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self, cancel: &CancellationToken) -> ExecutionResult<()> {
        loop {
            let popped = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.transition(WorkerState::Terminating);
                    // an item the cut-off pop already took goes back
                    if let Err(e) = self.queue.settle().await {
                        warn!(worker_id = self.id, error = %e, "Failed to settle queue on termination");
                    }
                    return Ok(());
                }
                popped = self.queue.pop(Some(self.settings.pop_timeout)) => popped,
            };

            match popped {
                Ok(item) => {
                    if let Flow::Drain = self.handle_item(item, cancel).await? {
                        return Ok(());
                    }
                }
                Err(e) if e.is_timeout() => continue,
                Err(e) if e.is_disconnected() => {
                    return Err(ExecutionError::Disconnected(e.to_string()));
                }
                Err(e) => {
                    warn!(worker_id = self.id, error = %e, "Pop failed, skipping iteration");
                    tokio::time::sleep(ERROR_PAUSE).await;
                }
            }
        }
    }

    async fn handle_item(&mut self, item: QueueItem, cancel: &CancellationToken) -> ExecutionResult<Flow> {
        match item {
            QueueItem::Sentinel { marker } if marker == self.settings.poison_pill => {
                info!(worker_id = self.id, "Received poison pill, draining");
                self.transition(WorkerState::Draining);
                Ok(Flow::Drain)
            }
            QueueItem::Sentinel { marker } => {
                warn!(worker_id = self.id, %marker, "Ignoring sentinel with unexpected marker");
                Ok(Flow::Continue)
            }
            QueueItem::Task { task } => {
                self.execute(task).await?;
                Ok(Flow::Continue)
            }
            QueueItem::Batch { tasks } => {
                let total = tasks.len();
                for (done, task) in tasks.into_iter().enumerate() {
                    if cancel.is_cancelled() {
                        warn!(
                            worker_id = self.id,
                            abandoned = total - done,
                            "Termination requested mid-batch"
                        );
                        break;
                    }
                    self.execute(task).await?;
                }
                Ok(Flow::Continue)
            }
            QueueItem::Results { entries } => {
                warn!(
                    worker_id = self.id,
                    entries = entries.len(),
                    "Ignoring results item found on the job queue"
                );
                Ok(Flow::Continue)
            }
        }
    }

    async fn execute(&mut self, raw: JsonValue) -> ExecutionResult<()> {
        self.processed += 1;

        let task = match Task::decode_value(&raw, &self.registry) {
            Ok(task) => task,
            Err(err) => {
                self.failed += 1;
                let kind = match &err {
                    TaskError::UnknownFunction { .. } => ErrorKind::UnknownFunction,
                    TaskError::MalformedPayload { .. } => ErrorKind::MalformedPayload,
                };
                warn!(worker_id = self.id, task_id = ?err.task_id(), error = %err, "Task decode failed");
                return match err.task_id() {
                    Some(task_id) => {
                        let entry = ResultEntry::new(task_id, Outcome::error(kind, err.to_string()));
                        self.record(entry).await
                    }
                    None => {
                        warn!(worker_id = self.id, "Dropping task without a recoverable id");
                        Ok(())
                    }
                };
            }
        };

        let task_id = task.id().to_string();
        debug!(worker_id = self.id, task_id = %task_id, function = task.function_name(), "Invoking task");

        let outcome = match tokio::task::spawn_blocking(move || task.invoke()).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::error(ErrorKind::Panicked, format!("task did not complete: {}", e)),
        };

        if let Some(descriptor) = outcome.error_descriptor() {
            self.failed += 1;
            warn!(
                worker_id = self.id,
                task_id = %task_id,
                kind = %descriptor.kind,
                error = %descriptor.message,
                "Task failed"
            );
        }

        self.record(ResultEntry::new(task_id, outcome)).await
    }

    async fn record(&self, entry: ResultEntry) -> ExecutionResult<()> {
        let task_id = entry.task_id.clone();
        match self.results.record(entry).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_disconnected() => Err(ExecutionError::Disconnected(e.to_string())),
            Err(e) => {
                error!(worker_id = self.id, task_id = %task_id, error = %e, "Failed to record outcome");
                Ok(())
            }
        }
    }
}
