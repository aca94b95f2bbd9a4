//! Deferred execution on a background thread
//!
//! [`DeferredHandle::start`] runs a closure on its own OS thread and returns
//! at once. Waiting on the handle blocks only the caller.

use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeferredError {
    #[error("Result not ready")]
    NotReady,

    #[error("Deferred call panicked: {0}")]
    Panicked(String),

    #[error("Result already taken")]
    AlreadyTaken,
}

enum Slot<T> {
    Pending,
    Done(Result<T, String>),
    Taken,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    finished: Condvar,
}

/// Handle to a call running on a background thread
pub struct DeferredHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> DeferredHandle<T> {
    /// Start `f` on a new thread
    pub fn start<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Pending),
            finished: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("deferred".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                    payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string())
                });
                *worker_shared.slot.lock() = Slot::Done(result);
                worker_shared.finished.notify_all();
            });

        if let Err(e) = handle {
            *shared.slot.lock() = Slot::Done(Err(format!("failed to spawn thread: {}", e)));
        }

        Self { shared }
    }
}

impl<T> DeferredHandle<T> {
    pub fn is_done(&self) -> bool {
        !matches!(*self.shared.slot.lock(), Slot::Pending)
    }

    /// Block until the call has finished
    pub fn join(&self) {
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.shared.finished.wait(&mut slot);
        }
    }

    /// Poll `is_done` every `poll_interval` until the call has finished
    pub fn wait_until_done(&self, poll_interval: Duration) {
        while !self.is_done() {
            thread::sleep(poll_interval);
        }
    }

    /// Take the result.
    ///
    /// With `block = false` this fails with [`DeferredError::NotReady`] while the
    /// call is still running. With `block = true` it waits, up to `timeout` when
    /// one is given.
    pub fn get_result(&self, block: bool, timeout: Option<Duration>) -> Result<T, DeferredError> {
        let mut slot = self.shared.slot.lock();

        if block {
            let deadline = timeout.map(|t| Instant::now() + t);
            while matches!(*slot, Slot::Pending) {
                match deadline {
                    Some(deadline) => {
                        if self.shared.finished.wait_until(&mut slot, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.shared.finished.wait(&mut slot),
                }
            }
        }

        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Pending => {
                *slot = Slot::Pending;
                Err(DeferredError::NotReady)
            }
            Slot::Done(Ok(value)) => Ok(value),
            Slot::Done(Err(message)) => Err(DeferredError::Panicked(message)),
            Slot::Taken => Err(DeferredError::AlreadyTaken),
        }
    }
}

/// Poll every handle until all have finished.
///
/// Accepts anything iterable over handle references, e.g. a `Vec` or
/// `map.values()`.
pub fn wait_all<'a, T, I>(handles: I, poll_interval: Duration)
where
    T: 'a,
    I: IntoIterator<Item = &'a DeferredHandle<T>>,
{
    let handles: Vec<_> = handles.into_iter().collect();
    while !handles.iter().all(|handle| handle.is_done()) {
        thread::sleep(poll_interval);
    }
}
