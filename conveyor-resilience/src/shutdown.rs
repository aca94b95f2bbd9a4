//! Signal-driven shutdown
//!
//! Long-running loops observe a [`CancellationToken`]; [`shutdown_on_signal`]
//! cancels it when the process receives Ctrl+C or SIGTERM. A
//! [`ShutdownCoordinator`] escalates from graceful to forced when the graceful
//! phase overruns. Child processes are stopped with [`ProcessShutdownManager`],
//! which escalates from SIGTERM to a hard kill.

use log::{error, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Operating system signal that requested shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "interrupt"),
            ShutdownSignal::Terminate => write!(f, "terminate"),
        }
    }
}

/// Shutdown error types
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("Failed to install signal handler: {0}")]
    SignalHandler(#[source] std::io::Error),

    #[error("Failed to signal process {pid}: {reason}")]
    SignalDelivery { pid: u32, reason: String },

    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),

    #[error("Process unresponsive to termination")]
    Unresponsive,
}

/// Phase of a coordinated shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Stop taking new work, finish what is in flight
    Graceful,
    /// Abandon in-flight work
    Forced,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Graceful => write!(f, "graceful"),
            ShutdownPhase::Forced => write!(f, "forced"),
        }
    }
}

/// Two-phase shutdown coordinator.
///
/// Components either subscribe to phase broadcasts or hold the per-phase
/// cancellation tokens.
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<ShutdownPhase>,
    graceful: CancellationToken,
    forced: CancellationToken,
    graceful_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(graceful_timeout: Duration) -> Self {
        let (sender, _) = broadcast::channel(4);
        Self {
            sender,
            graceful: CancellationToken::new(),
            forced: CancellationToken::new(),
            graceful_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.sender.subscribe()
    }

    /// Cancelled when the graceful phase starts
    pub fn graceful_token(&self) -> CancellationToken {
        self.graceful.clone()
    }

    /// Cancelled when shutdown escalates to forced
    pub fn forced_token(&self) -> CancellationToken {
        self.forced.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.graceful.is_cancelled()
    }

    /// Start the graceful phase and wait for `drained`.
    ///
    /// Escalates to [`ShutdownPhase::Forced`] if `drained` does not finish
    /// within the graceful timeout. Returns the phase shutdown ended in.
    pub async fn shutdown<F>(&self, drained: F) -> ShutdownPhase
    where
        F: Future<Output = ()>,
    {
        if self.is_shutting_down() {
            warn!("Shutdown already in progress");
        }

        info!("Starting graceful shutdown");
        self.graceful.cancel();
        // no subscribers is fine
        let _ = self.sender.send(ShutdownPhase::Graceful);

        if timeout(self.graceful_timeout, drained).await.is_ok() {
            info!("Graceful shutdown completed");
            return ShutdownPhase::Graceful;
        }

        error!(
            "Graceful shutdown did not finish within {:?}, forcing shutdown",
            self.graceful_timeout
        );
        self.forced.cancel();
        let _ = self.sender.send(ShutdownPhase::Forced);
        ShutdownPhase::Forced
    }
}

/// Wait until the process receives Ctrl+C or SIGTERM
pub async fn wait_for_os_signal() -> Result<ShutdownSignal, ShutdownError> {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .map_err(ShutdownError::SignalHandler)
            .map(|_| ShutdownSignal::Interrupt)
    };

    #[cfg(unix)]
    let terminate = async {
        let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(ShutdownError::SignalHandler)?;
        stream.recv().await;
        Ok(ShutdownSignal::Terminate)
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<ShutdownSignal, ShutdownError>>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}

/// Cancel `token` when a shutdown signal arrives.
///
/// The listener exits quietly if the token is cancelled by someone else first.
pub fn shutdown_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            signal = wait_for_os_signal() => {
                match signal {
                    Ok(signal) => info!("Received {} signal, shutting down", signal),
                    Err(e) => error!("Signal listener failed: {}", e),
                }
                token.cancel();
            }
        }
    })
}

/// Process shutdown manager for child processes
pub struct ProcessShutdownManager;

impl ProcessShutdownManager {
    /// Ask a process to terminate without waiting for it
    #[cfg(all(unix, feature = "shutdown"))]
    pub fn request_termination(pid: u32) -> Result<(), ShutdownError> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| {
            ShutdownError::SignalDelivery {
                pid,
                reason: e.to_string(),
            }
        })
    }

    #[cfg(not(all(unix, feature = "shutdown")))]
    pub fn request_termination(pid: u32) -> Result<(), ShutdownError> {
        Err(ShutdownError::SignalDelivery {
            pid,
            reason: "signals are not supported on this platform".to_string(),
        })
    }

    /// Stop a child: SIGTERM, wait up to `graceful_timeout`, then kill
    pub async fn shutdown_process(
        child: &mut Child,
        graceful_timeout: Duration,
    ) -> Result<std::process::ExitStatus, ShutdownError> {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        if let Some(id) = child.id() {
            info!("Initiating graceful shutdown for process {}", id);
            if let Err(e) = Self::request_termination(id) {
                warn!("{}", e);
            }
        }

        match timeout(graceful_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Process terminated gracefully with status: {:?}", status);
                return Ok(status);
            }
            Ok(Err(e)) => error!("Error waiting for process: {}", e),
            Err(_) => warn!("Process did not terminate gracefully within timeout"),
        }

        info!("Forcing process termination");
        child.start_kill()?;

        match timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => {
                info!("Process terminated forcefully with status: {:?}", status);
                Ok(status)
            }
            Ok(Err(e)) => Err(ShutdownError::Process(e)),
            Err(_) => {
                error!("Process did not terminate even after force kill");
                Err(ShutdownError::Unresponsive)
            }
        }
    }
}
