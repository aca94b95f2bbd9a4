//! Manager error types

use conveyor_queue::QueueError;
use thiserror::Error;

use crate::protocol::RemoteFailure;

pub type IpcResult<T> = Result<T, IpcError>;

/// Manager error types
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("Failed to bind {endpoint}: {reason}")]
    BindFailed { endpoint: String, reason: String },

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// The client asked for an accessor the server does not expose
    #[error("Accessor '{0}' is not exposed by the server")]
    UnknownAccessor(String),

    #[error("Accessor '{name}' is a {actual}, expected {expected}")]
    WrongAccessorKind {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Remote failure: {0}")]
    Remote(RemoteFailure),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl IpcError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IpcError::IoError(_)
                | IpcError::Timeout
                | IpcError::ConnectionClosed
                | IpcError::ConnectFailed { .. }
        )
    }

    /// Check if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::ProtocolVersionMismatch { .. }
                | IpcError::InvalidMessage(_)
                | IpcError::AuthenticationRejected(_)
                | IpcError::UnknownAccessor(_)
        )
    }

    fn is_transport(&self) -> bool {
        matches!(
            self,
            IpcError::IoError(_)
                | IpcError::ConnectionClosed
                | IpcError::ConnectFailed { .. }
                | IpcError::ProtocolVersionMismatch { .. }
                | IpcError::DeserializationError(_)
                | IpcError::InvalidMessage(_)
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}

/// Proxy errors surface through the queue contract
impl From<IpcError> for QueueError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Queue(inner) => inner,
            IpcError::Remote(failure) => failure.into(),
            other if other.is_transport() => QueueError::Disconnected(other.to_string()),
            other => QueueError::Remote(other.to_string()),
        }
    }
}
