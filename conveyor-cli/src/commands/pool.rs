//! `conveyor pool`

use anyhow::{Context, Result};
use conveyor_config::ConveyorConfig;
use conveyor_execution::{ProcessLauncher, Watchdog};
use conveyor_ipc::TASKS_QUEUE_ACCESSOR;
use conveyor_queue::JobQueue;
use conveyor_resilience::{wait_for_os_signal, ShutdownCoordinator, ShutdownPhase};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::connect;

/// Extra time on top of the workers' grace period for the watchdog itself
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(5);

/// Arguments handed to every worker process ahead of `--worker`
pub fn worker_args(config_path: Option<&PathBuf>, log_level: Option<&String>) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(path) = config_path {
        args.push(OsString::from("--config"));
        args.push(path.as_os_str().to_owned());
    }
    if let Some(level) = log_level {
        args.push(OsString::from("--log-level"));
        args.push(OsString::from(level));
    }
    args
}

/// Supervise worker processes until a shutdown signal, then retire them
pub async fn pool_command(config: &ConveyorConfig, worker_args: Vec<OsString>) -> Result<()> {
    let client = connect(&config.queues.jobs.to_endpoint(), &[TASKS_QUEUE_ACCESSOR]).await?;
    let queue: Arc<dyn JobQueue> = Arc::new(client.tasks_queue()?);

    let launcher = ProcessLauncher::current_exe(worker_args)
        .context("Failed to locate the conveyor executable")?;
    let settings = config.workers.watchdog_settings();
    let coordinator = ShutdownCoordinator::new(settings.graceful_timeout + SHUTDOWN_MARGIN);

    let watchdog = Watchdog::new(settings, queue, Box::new(launcher));
    let mut running = tokio::spawn(watchdog.run(coordinator.graceful_token()));

    let finished = tokio::select! {
        result = &mut running => Some(result),
        signal = wait_for_os_signal() => {
            match signal {
                Ok(signal) => info!("Received {} signal, retiring workers", signal),
                Err(e) => error!("Signal listener failed: {}", e),
            }
            None
        }
    };

    // The watchdog ended on its own, e.g. a worker could not be launched
    if let Some(result) = finished {
        return result
            .context("Watchdog task failed")?
            .context("Watchdog stopped with an error");
    }

    let phase = coordinator
        .shutdown(async {
            match (&mut running).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Watchdog stopped with an error: {}", e),
                Err(e) => error!("Watchdog task failed: {}", e),
            }
        })
        .await;

    if phase == ShutdownPhase::Forced {
        warn!("Workers did not retire in time, killing the pool");
        running.abort();
    }

    info!("Pool stopped");
    Ok(())
}
