//! Post-condition checks on operation results

use log::warn;
use std::future::Future;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CheckError<E> {
    #[error("Check on result of {operation} failed")]
    PostconditionFailed { operation: String },

    #[error("{0}")]
    Operation(E),
}

impl<E> CheckError<E> {
    pub fn is_postcondition_failure(&self) -> bool {
        matches!(self, CheckError::PostconditionFailed { .. })
    }
}

/// Run `op(args)` and validate its value with `predicate(&value, &args)`.
///
/// Errors from `op` pass through as [`CheckError::Operation`].
pub fn check_result<A, T, E, F, P>(
    operation: &str,
    args: A,
    op: F,
    predicate: P,
) -> Result<T, CheckError<E>>
where
    F: FnOnce(&A) -> Result<T, E>,
    P: FnOnce(&T, &A) -> bool,
{
    let value = op(&args).map_err(CheckError::Operation)?;
    if predicate(&value, &args) {
        Ok(value)
    } else {
        warn!("Post-condition failed for {}", operation);
        Err(CheckError::PostconditionFailed {
            operation: operation.to_string(),
        })
    }
}

/// Async form of [`check_result`]; the arguments are captured by `op`
pub async fn check_result_async<T, E, Fut, P>(
    operation: &str,
    op: Fut,
    predicate: P,
) -> Result<T, CheckError<E>>
where
    Fut: Future<Output = Result<T, E>>,
    P: FnOnce(&T) -> bool,
{
    let value = op.await.map_err(CheckError::Operation)?;
    if predicate(&value) {
        Ok(value)
    } else {
        warn!("Post-condition failed for {}", operation);
        Err(CheckError::PostconditionFailed {
            operation: operation.to_string(),
        })
    }
}
