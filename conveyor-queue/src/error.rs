//! Queue error types

use thiserror::Error;

/// Queue result type
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue and result store errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Pop timed out with nothing to return
    #[error("Queue is empty")]
    Empty,

    /// Result fetch timed out before the entry was written
    #[error("Result for task '{0}' is not available yet")]
    NotAvailable(String),

    /// Operation not offered by this queue type
    #[error("Operation '{0}' is not supported by this queue")]
    Unsupported(String),

    /// Journal file could not be read or written
    #[error("Journal I/O error: {0}")]
    Journal(#[from] std::io::Error),

    /// Journal contains a record that cannot be replayed
    #[error("Corrupt journal record at line {line}: {reason}")]
    CorruptJournal { line: usize, reason: String },

    /// Connection to a remote queue was lost
    #[error("Disconnected from remote queue: {0}")]
    Disconnected(String),

    /// Remote side reported a failure
    #[error("Remote queue error: {0}")]
    Remote(String),
}

impl QueueError {
    /// Control conditions that callers loop over rather than report
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueueError::Empty | QueueError::NotAvailable(_))
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, QueueError::Disconnected(_))
    }
}
