//! Retry policy and executor
//!
//! A policy allows `tries` attempts in total. After each retryable failure the
//! executor logs a warning, sleeps the current delay and multiplies the delay by
//! `backoff`. The last attempt is unguarded: its error is returned as-is inside
//! [`RetryError::Exhausted`].

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::backoff::Backoff;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the final unguarded one
    pub tries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Multiplier applied to the delay after every failed attempt
    pub backoff: f64,

    /// Upper bound for any single delay
    #[serde(default, with = "humantime_serde")]
    pub max_delay: Option<Duration>,

    /// Whether to add +/-20% jitter to delays
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 4,
            delay: Duration::from_secs(3),
            backoff: 2.0,
            max_delay: None,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(tries: u32, delay: Duration, backoff: f64) -> Self {
        Self {
            tries,
            delay,
            backoff,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay schedule this policy sleeps through between attempts
    pub fn schedule(&self) -> Backoff {
        Backoff::new(self.delay, self.backoff)
            .with_cap(self.max_delay)
            .with_jitter(self.jitter)
    }

    /// Delay to sleep after failed attempt number `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match attempt.checked_sub(1) {
            Some(index) => self.schedule().nth(index as usize).unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }
}

/// Trait for errors that can be retried
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the error of the final attempt
    #[error("Operation failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    /// Non-retryable error encountered
    #[error("Non-retryable error: {0}")]
    NonRetryable(E),
}

impl<E> RetryError<E> {
    /// Get the underlying error
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::NonRetryable(error) => error,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Exhausted { attempts, .. } => Some(*attempts),
            RetryError::NonRetryable(_) => None,
        }
    }
}

enum Step {
    Retry(Duration),
    GiveUp,
    Fatal,
}

/// Retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn with_default_policy() -> Self {
        Self::new(RetryPolicy::default())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `f`, retrying errors that report themselves as retryable
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.execute_if(|error: &E| error.is_retryable(), f).await
    }

    /// Execute `f`, retrying errors accepted by `is_retryable`.
    ///
    /// `f` receives the 1-indexed attempt number.
    pub async fn execute_if<P, F, Fut, T, E>(&self, is_retryable: P, mut f: F) -> Result<T, RetryError<E>>
    where
        P: Fn(&E) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;

        loop {
            debug!("Executing attempt {} of {}", attempt, self.policy.tries);

            match f(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => match self.next_step(attempt, &error, &is_retryable) {
                    Step::Retry(delay) => {
                        sleep(delay).await;
                        attempt += 1;
                    }
                    Step::GiveUp => {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last_error: error,
                        })
                    }
                    Step::Fatal => return Err(RetryError::NonRetryable(error)),
                },
            }
        }
    }

    /// Blocking variant for synchronous callers; sleeps the current thread
    pub fn execute_blocking<P, F, T, E>(&self, is_retryable: P, mut f: F) -> Result<T, RetryError<E>>
    where
        P: Fn(&E) -> bool,
        F: FnMut(u32) -> Result<T, E>,
        E: Display,
    {
        let mut attempt = 1;

        loop {
            match f(attempt) {
                Ok(result) => return Ok(result),
                Err(error) => match self.next_step(attempt, &error, &is_retryable) {
                    Step::Retry(delay) => {
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    Step::GiveUp => {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last_error: error,
                        })
                    }
                    Step::Fatal => return Err(RetryError::NonRetryable(error)),
                },
            }
        }
    }

    fn next_step<E, P>(&self, attempt: u32, error: &E, is_retryable: &P) -> Step
    where
        E: Display,
        P: Fn(&E) -> bool,
    {
        if !is_retryable(error) {
            warn!("Operation failed with non-retryable error: {}", error);
            return Step::Fatal;
        }

        if attempt >= self.policy.tries {
            warn!("Operation failed after {} attempts: {}", attempt, error);
            return Step::GiveUp;
        }

        let delay = self.policy.delay_for_attempt(attempt);
        warn!("{}, Retrying in {:?}...", error, delay);
        Step::Retry(delay)
    }
}

/// Run `f` under `policy`, retrying errors accepted by `is_retryable`
pub async fn retry_async<P, F, Fut, T, E>(
    policy: &RetryPolicy,
    is_retryable: P,
    f: F,
) -> Result<T, RetryError<E>>
where
    P: Fn(&E) -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    RetryExecutor::new(policy.clone()).execute_if(is_retryable, f).await
}

/// Blocking counterpart of [`retry_async`]
pub fn retry_blocking<P, F, T, E>(
    policy: &RetryPolicy,
    is_retryable: P,
    f: F,
) -> Result<T, RetryError<E>>
where
    P: Fn(&E) -> bool,
    F: FnMut(u32) -> Result<T, E>,
    E: Display,
{
    RetryExecutor::new(policy.clone()).execute_blocking(is_retryable, f)
}
