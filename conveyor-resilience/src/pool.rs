//! Fixed-size thread pool with scoped lifetime
//!
//! [`with_pool`] hands a pool to a closure and always closes and joins it
//! afterwards, whether the closure returns normally, returns an error or
//! panics.

use log::{debug, error};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool size must be at least 1")]
    InvalidSize,

    #[error("Pool is closed")]
    Closed,

    #[error("Failed to spawn pool thread: {0}")]
    Spawn(String),

    #[error("Pooled job panicked: {0}")]
    JobPanicked(String),
}

/// Pending result of a job submitted with [`WorkerPool::submit`]
pub struct PoolTask<T> {
    receiver: mpsc::Receiver<Result<T, PoolError>>,
}

impl<T> PoolTask<T> {
    /// Block until the job has run
    pub fn wait(self) -> Result<T, PoolError> {
        self.receiver.recv().map_err(|_| PoolError::Closed)?
    }
}

/// Fixed-size pool of OS threads
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidSize);
        }

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut threads = Vec::with_capacity(size);

        for index in 0..size {
            let receiver = Arc::clone(&receiver);
            let thread = thread::Builder::new()
                .name(format!("pool-{}", index))
                .spawn(move || loop {
                    let job = receiver.lock().recv();
                    match job {
                        Ok(job) => {
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!("Job on pool thread {} panicked", index);
                            }
                        }
                        Err(_) => break,
                    }
                })
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            threads.push(thread);
        }

        debug!("Started worker pool with {} threads", size);
        Ok(Self {
            sender: Some(sender),
            threads,
        })
    }

    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Queue a job without tracking its result
    pub fn execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(PoolError::Closed)?;
        sender.send(Box::new(job)).map_err(|_| PoolError::Closed)
    }

    /// Queue a job and return a handle to its result
    pub fn submit<F, T>(&self, job: F) -> Result<PoolTask<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.execute(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
                PoolError::JobPanicked(
                    payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string()),
                )
            });
            // receiver may have been dropped
            let _ = tx.send(result);
        })?;
        Ok(PoolTask { receiver: rx })
    }

    /// Stop accepting jobs; queued jobs still run
    pub fn close(&mut self) {
        self.sender.take();
    }

    /// Close the pool and wait for every thread to exit
    pub fn join(&mut self) {
        self.close();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("Pool thread exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join();
    }
}

/// Run `f` with a fresh pool of `size` threads, then close and join the pool
pub fn with_pool<F, R>(size: usize, f: F) -> Result<R, PoolError>
where
    F: FnOnce(&WorkerPool) -> R,
{
    let mut pool = WorkerPool::new(size)?;
    let result = panic::catch_unwind(AssertUnwindSafe(|| f(&pool)));
    pool.join();
    match result {
        Ok(value) => Ok(value),
        Err(payload) => panic::resume_unwind(payload),
    }
}
