//! Worker launchers
//!
//! The watchdog starts workers through a [`WorkerLauncher`] and tracks them
//! through the returned [`WorkerHandle`]. [`ProcessLauncher`] runs each
//! worker as a separate OS process; [`InProcessLauncher`] runs it as a tokio
//! task in the current process.

use async_trait::async_trait;
use conveyor_core::FunctionRegistry;
use conveyor_queue::{JobQueue, ResultDestination};
use conveyor_resilience::ProcessShutdownManager;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::worker::{Worker, WorkerReport, WorkerSettings, WorkerState};

/// A launched worker
#[async_trait]
pub trait WorkerHandle: Send {
    fn worker_id(&self) -> usize;

    /// OS process id, when the worker is its own process
    fn pid(&self) -> Option<u32>;

    fn is_alive(&mut self) -> bool;

    /// Ask the worker to stop without waiting for it
    fn terminate(&mut self) -> ExecutionResult<()>;

    /// Stop the worker, forcing it after `grace`
    async fn shutdown(&mut self, grace: Duration) -> ExecutionResult<()>;
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, worker_id: usize) -> ExecutionResult<Box<dyn WorkerHandle>>;
}

/// Launches `<program> <args..> --worker --worker-id N`
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable in worker mode
    pub fn current_exe(args: Vec<OsString>) -> ExecutionResult<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, worker_id: usize) -> ExecutionResult<Box<dyn WorkerHandle>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg("--worker")
            .arg("--worker-id")
            .arg(worker_id.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::LaunchFailed {
                worker_id,
                reason: e.to_string(),
            })?;

        info!(worker_id, pid = ?child.id(), "Launched worker process");
        Ok(Box::new(ProcessHandle { worker_id, child }))
    }
}

struct ProcessHandle {
    worker_id: usize,
    child: Child,
}

#[async_trait]
impl WorkerHandle for ProcessHandle {
    fn worker_id(&self) -> usize {
        self.worker_id
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> ExecutionResult<()> {
        match self.child.id() {
            Some(pid) => Ok(ProcessShutdownManager::request_termination(pid)?),
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self, grace: Duration) -> ExecutionResult<()> {
        let status = ProcessShutdownManager::shutdown_process(&mut self.child, grace).await?;
        info!(worker_id = self.worker_id, %status, "Worker process exited");
        Ok(())
    }
}

/// Runs workers as tokio tasks sharing this process's queue and registry
pub struct InProcessLauncher {
    registry: Arc<FunctionRegistry>,
    queue: Arc<dyn JobQueue>,
    results: ResultDestination,
    settings: WorkerSettings,
}

impl InProcessLauncher {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        queue: Arc<dyn JobQueue>,
        results: ResultDestination,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            registry,
            queue,
            results,
            settings,
        }
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, worker_id: usize) -> ExecutionResult<Box<dyn WorkerHandle>> {
        let worker = Worker::new(
            worker_id,
            Arc::clone(&self.registry),
            Arc::clone(&self.queue),
            self.results.clone(),
            self.settings.clone(),
        );
        let state = worker.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(worker.run(cancel.clone()));

        info!(worker_id, "Launched in-process worker");
        Ok(Box::new(InProcessHandle {
            worker_id,
            cancel,
            task: Some(task),
            state,
            report: None,
        }))
    }
}

/// Handle to a worker running as a tokio task
pub struct InProcessHandle {
    worker_id: usize,
    cancel: CancellationToken,
    task: Option<JoinHandle<ExecutionResult<WorkerReport>>>,
    state: watch::Receiver<WorkerState>,
    report: Option<WorkerReport>,
}

impl InProcessHandle {
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Report of a worker that has stopped cleanly
    pub fn report(&self) -> Option<&WorkerReport> {
        self.report.as_ref()
    }

    fn absorb(&mut self, joined: Result<ExecutionResult<WorkerReport>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(report)) => self.report = Some(report),
            Ok(Err(e)) => warn!(worker_id = self.worker_id, error = %e, "Worker failed"),
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(worker_id = self.worker_id, error = %e, "Worker task panicked"),
        }
    }
}

#[async_trait]
impl WorkerHandle for InProcessHandle {
    fn worker_id(&self) -> usize {
        self.worker_id
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_alive(&mut self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn terminate(&mut self) -> ExecutionResult<()> {
        self.cancel.cancel();
        Ok(())
    }

    async fn shutdown(&mut self, grace: Duration) -> ExecutionResult<()> {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(grace, &mut task).await {
            Ok(joined) => self.absorb(joined),
            Err(_) => {
                warn!(worker_id = self.worker_id, "Worker did not stop in time, aborting");
                task.abort();
                let joined = task.await;
                self.absorb(joined);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::{FunctionError, TaskArgs, TaskPayload};
    use conveyor_queue::{FifoQueue, QueueItem, ResultStore};
    use serde_json::json;

    fn launcher(queue: Arc<FifoQueue>, store: Arc<ResultStore>) -> InProcessLauncher {
        let mut registry = FunctionRegistry::new();
        registry
            .register("echo", |args: &TaskArgs| Ok::<_, FunctionError>(args.to_value()))
            .unwrap();
        InProcessLauncher::new(
            Arc::new(registry),
            queue,
            store.into(),
            WorkerSettings {
                pop_timeout: Duration::from_millis(20),
                ..WorkerSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_in_process_worker_runs_until_poison_pill() {
        let queue = Arc::new(FifoQueue::new());
        let store = Arc::new(ResultStore::new());
        let mut handle = launcher(queue.clone(), store.clone()).launch(4).await.unwrap();

        assert_eq!(handle.worker_id(), 4);
        assert_eq!(handle.pid(), None);
        assert!(handle.is_alive());

        queue
            .push(QueueItem::task(&TaskPayload::with_id("t", "echo", json!(1))))
            .await
            .unwrap();
        queue.push(QueueItem::sentinel("-STOP-")).await.unwrap();

        store.fetch("t", Some(Duration::from_secs(5))).await.unwrap();
        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_terminate_stops_idle_worker() {
        let queue = Arc::new(FifoQueue::new());
        let store = Arc::new(ResultStore::new());
        let mut handle = launcher(queue, store).launch(1).await.unwrap();

        handle.terminate().unwrap();
        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(!handle.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_launcher_passes_worker_flags() {
        let launcher = ProcessLauncher::new("sh", vec!["-c".into(), "sleep 30".into(), "sh".into()]);
        let mut handle = launcher.launch(2).await.unwrap();

        assert!(handle.pid().is_some());
        assert!(handle.is_alive());
        handle.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(!handle.is_alive());
    }
}
