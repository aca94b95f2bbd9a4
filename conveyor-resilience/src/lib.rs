//! Resilience helpers for Conveyor
//!
//! General-purpose tools used around the queue runtime: retry with backoff,
//! thread-backed deferred handles, post-condition checks, a scoped worker
//! pool, and signal-driven shutdown.

pub mod backoff;
pub mod deferred;
pub mod pool;
pub mod postcondition;
pub mod retry;
pub mod shutdown;

// Re-export commonly used types
pub use backoff::Backoff;
pub use deferred::{wait_all, DeferredError, DeferredHandle};
pub use pool::{with_pool, PoolError, PoolTask, WorkerPool};
pub use postcondition::{check_result, check_result_async, CheckError};
pub use retry::{retry_async, retry_blocking, RetryError, RetryExecutor, RetryPolicy, Retryable};
pub use shutdown::{
    shutdown_on_signal, wait_for_os_signal, ProcessShutdownManager, ShutdownCoordinator,
    ShutdownError, ShutdownPhase, ShutdownSignal,
};
