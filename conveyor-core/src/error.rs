//! Core error types for Conveyor

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// Registry-related errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Task decode errors
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for Conveyor core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Function registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Function '{0}' is already registered")]
    Duplicate(String),

    #[error("Function '{0}' is not registered")]
    NameNotFound(String),

    #[error("Function name '{0}' is invalid")]
    InvalidName(String),
}

/// Errors raised while turning a wire payload back into a runnable task.
///
/// Both variants carry whatever task id could be recovered so the caller can
/// still record an outcome for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Unknown function '{function}' for task {task_id}")]
    UnknownFunction { task_id: String, function: String },

    #[error("Malformed task payload: {reason}")]
    MalformedPayload {
        task_id: Option<String>,
        reason: String,
    },
}

impl TaskError {
    /// Task id recovered from the payload, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskError::UnknownFunction { task_id, .. } => Some(task_id),
            TaskError::MalformedPayload { task_id, .. } => task_id.as_deref(),
        }
    }
}

/// Failure raised by a task body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Argument missing or of the wrong type
    pub fn bad_argument(name: &str, expected: &str) -> Self {
        Self::new(format!("argument '{}' must be {}", name, expected))
    }
}
