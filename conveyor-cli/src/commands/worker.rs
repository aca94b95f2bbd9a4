//! `conveyor worker` and the hidden `--worker` mode used by the pool

use anyhow::{Context, Result};
use conveyor_config::ConveyorConfig;
use conveyor_core::default_registry;
use conveyor_execution::Worker;
use conveyor_ipc::{RESULTS_ACCESSOR, TASKS_QUEUE_ACCESSOR};
use conveyor_queue::JobQueue;
use conveyor_resilience::shutdown_on_signal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{connect, same_manager};

/// Run one worker against the configured managers until it drains or is
/// signalled
pub async fn run_worker(config: &ConveyorConfig, worker_id: usize) -> Result<()> {
    let queues = &config.queues;

    let (jobs, results) = if same_manager(queues) {
        let client = connect(
            &queues.jobs.to_endpoint(),
            &[TASKS_QUEUE_ACCESSOR, RESULTS_ACCESSOR],
        )
        .await?;
        (client.clone(), client)
    } else {
        let jobs = connect(&queues.jobs.to_endpoint(), &[TASKS_QUEUE_ACCESSOR]).await?;
        let results = connect(&queues.results.to_endpoint(), &[RESULTS_ACCESSOR]).await?;
        (jobs, results)
    };

    let queue: Arc<dyn JobQueue> = Arc::new(jobs.tasks_queue()?);
    let destination = results.results_destination()?;

    let worker = Worker::new(
        worker_id,
        Arc::new(default_registry()),
        queue,
        destination,
        config.workers.worker_settings(),
    );

    let cancel = CancellationToken::new();
    let listener = shutdown_on_signal(cancel.clone());

    let report = worker
        .run(cancel.clone())
        .await
        .with_context(|| format!("Worker {} stopped with an error", worker_id))?;

    cancel.cancel();
    if let Err(e) = listener.await {
        warn!(worker_id, error = %e, "Signal listener task failed");
    }

    info!(
        worker_id = report.worker_id,
        processed = report.processed,
        failed = report.failed,
        final_state = %report.final_state,
        "Worker finished"
    );
    Ok(())
}
