//! Error types for the worker runtime

use conveyor_queue::QueueError;
use conveyor_resilience::ShutdownError;
use thiserror::Error;

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Worker and watchdog errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The job queue or result destination went away
    #[error("Lost connection to shared objects: {0}")]
    Disconnected(String),

    #[error("Failed to launch worker {worker_id}: {reason}")]
    LaunchFailed { worker_id: usize, reason: String },

    #[error("Shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),

    #[error("Worker error: {0}")]
    WorkerError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
