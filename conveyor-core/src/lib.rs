//! Core domain models for Conveyor
//!
//! This crate defines the unit of work moved through the system: the
//! [`Task`], the process-wide [`FunctionRegistry`] that gives task function
//! names meaning, and the [`Outcome`] recorded for every task id.

pub mod builtin;
pub mod endpoint;
pub mod error;
pub mod outcome;
pub mod registry;
pub mod task;

// Re-export commonly used types at the crate root
pub use builtin::default_registry;
pub use endpoint::ServerEndpoint;
pub use error::{CoreError, FunctionError, RegistryError, Result, TaskError};
pub use outcome::{ErrorDescriptor, ErrorKind, Outcome, ResultEntry};
pub use registry::{FunctionRegistry, FunctionResult, TaskFunction};
pub use task::{Task, TaskArgs, TaskPayload};
