//! Manager layer for Conveyor
//!
//! A [`ManagerServer`] exposes a fixed set of named shared objects (a job
//! queue, a result store) on a TCP endpoint guarded by a shared secret. A
//! [`ManagerClient`] authenticates against it and hands out proxies that
//! implement the same queue and result-store contracts as the local objects.

pub mod auth;
pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-export commonly used types
pub use client::{ManagerClient, QueueProxy, ResultsProxy};
pub use error::{IpcError, IpcResult};
pub use protocol::{
    AccessorInfo, AccessorKind, Call, ClientMessage, FailureKind, ManagerRequest,
    ManagerResponse, MessageEnvelope, RemoteFailure, Reply, ServerInfo, ServerMessage,
    CLOSE_SERVER_ACCESSOR, IPC_PROTOCOL_VERSION, RESULTS_ACCESSOR, SERVER_INFO_ACCESSOR,
    TASKS_QUEUE_ACCESSOR,
};
pub use server::{ManagerServer, ManagerServerBuilder, ServerHandle};
pub use transport::{IpcTransport, TcpTransport};
