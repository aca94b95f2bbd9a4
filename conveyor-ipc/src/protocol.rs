//! Manager protocol definitions and message types
//!
//! Every frame is one JSON line holding a [`MessageEnvelope`]. A session
//! starts with the server's [`ServerMessage::Challenge`]; after a successful
//! [`ClientMessage::Authenticate`] the client sends [`ManagerRequest`]s and the
//! server answers each with a [`ManagerResponse`] carrying the same
//! correlation id.

use chrono::{DateTime, Utc};
use conveyor_core::{Outcome, ResultEntry};
use conveyor_queue::{QueueError, QueueItem, QueueKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Accessor for the job queue
pub const TASKS_QUEUE_ACCESSOR: &str = "get_tasks_queue";
/// Accessor for the result store
pub const RESULTS_ACCESSOR: &str = "get_results";
/// Always exposed: describes the server
pub const SERVER_INFO_ACCESSOR: &str = "get_server_info";
/// Always exposed: stops the server
pub const CLOSE_SERVER_ACCESSOR: &str = "close_server";

/// Messages sent from the server to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame of every session
    Challenge { nonce: String },

    /// Authentication accepted; describes the accessors the client asked for
    Welcome { accessors: Vec<AccessorInfo> },

    /// Authentication refused; the server closes the connection
    Rejected { reason: String },

    Response(ManagerResponse),
}

/// Messages sent from a client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// `digest` is `hex(sha256(nonce || secret))`
    Authenticate {
        digest: String,
        accessors: Vec<String>,
    },

    Request(ManagerRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerRequest {
    pub correlation_id: Uuid,
    pub accessor: String,
    pub call: Call,
}

impl ManagerRequest {
    pub fn new(accessor: impl Into<String>, call: Call) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            accessor: accessor.into(),
            call,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerResponse {
    pub correlation_id: Uuid,
    pub reply: Reply,
}

/// Operation on an exposed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    // queue operations
    Push {
        item: QueueItem,
        priority: i64,
    },
    Pop {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Len,
    Peek {
        index: usize,
    },
    /// Return an item whose pop reply never reached the caller
    Requeue {
        item: QueueItem,
        priority: i64,
    },
    PurgeSentinels {
        marker: String,
    },

    // result store operations
    SetResult {
        entry: ResultEntry,
    },
    GetResult {
        task_id: String,
    },
    FetchResult {
        task_id: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Keys,

    ServerInfo,
    Close,
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::Push { .. } => "push",
            Call::Pop { .. } => "pop",
            Call::Len => "len",
            Call::Peek { .. } => "peek",
            Call::Requeue { .. } => "requeue",
            Call::PurgeSentinels { .. } => "purge_sentinels",
            Call::SetResult { .. } => "set_result",
            Call::GetResult { .. } => "get_result",
            Call::FetchResult { .. } => "fetch_result",
            Call::Keys => "keys",
            Call::ServerInfo => "server_info",
            Call::Close => "close",
        }
    }
}

/// Result of a [`Call`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Done,
    Item {
        item: QueueItem,
        #[serde(default)]
        priority: i64,
    },
    MaybeItem { item: Option<QueueItem> },
    Length { len: usize },
    Outcome { outcome: Option<Outcome> },
    Keys { keys: Vec<String> },
    ServerInfo { info: ServerInfo },
    Failed { failure: RemoteFailure },
}

impl Reply {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Reply::Failed {
            failure: RemoteFailure {
                kind,
                message: message.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Pop timed out
    Empty,
    /// Fetch timed out
    NotAvailable,
    /// The accessor does not support the call
    Unsupported,
    /// The accessor was not registered for this session
    UnknownAccessor,
    /// The server is shutting down
    Closing,
    Internal,
}

/// Failure reported by the server for a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<QueueError> for RemoteFailure {
    fn from(err: QueueError) -> Self {
        let kind = match &err {
            QueueError::Empty => FailureKind::Empty,
            QueueError::NotAvailable(_) => FailureKind::NotAvailable,
            QueueError::Unsupported(_) => FailureKind::Unsupported,
            _ => FailureKind::Internal,
        };
        RemoteFailure {
            kind,
            message: match err {
                QueueError::NotAvailable(task_id) => task_id,
                other => other.to_string(),
            },
        }
    }
}

impl From<RemoteFailure> for QueueError {
    fn from(failure: RemoteFailure) -> Self {
        match failure.kind {
            FailureKind::Empty => QueueError::Empty,
            FailureKind::NotAvailable => QueueError::NotAvailable(failure.message),
            FailureKind::Unsupported => QueueError::Unsupported(failure.message),
            FailureKind::Closing => QueueError::Disconnected(failure.message),
            FailureKind::UnknownAccessor | FailureKind::Internal => {
                QueueError::Remote(failure.message)
            }
        }
    }
}

/// What an accessor hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessorKind {
    Queue { queue_kind: QueueKind },
    Mapping,
    ServerInfo,
    Control,
}

impl fmt::Display for AccessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessorKind::Queue { queue_kind } => write!(f, "{} queue", queue_kind),
            AccessorKind::Mapping => write!(f, "mapping"),
            AccessorKind::ServerInfo => write!(f, "server info"),
            AccessorKind::Control => write!(f, "control"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorInfo {
    pub name: String,
    pub kind: AccessorKind,
}

/// Public description of a running server. Never includes the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub address: String,
    pub port: u16,
    pub accessors: Vec<AccessorInfo>,
}

/// Message envelope for all manager communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
