//! `conveyor serve`

use anyhow::{Context, Result};
use conveyor_config::ConveyorConfig;
use conveyor_ipc::{ManagerServer, ServerHandle};
use conveyor_queue::ResultStore;
use conveyor_resilience::wait_for_os_signal;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info};

use super::{build_queue, same_manager};
use crate::cli::Managers;

/// Host the selected managers until a signal arrives or every manager is
/// closed remotely.
pub async fn serve_command(config: &ConveyorConfig, managers: Managers) -> Result<()> {
    let queues = &config.queues;
    let mut builders = Vec::new();

    if managers.includes_jobs() && managers.includes_results() && same_manager(queues) {
        builders.push(
            ManagerServer::builder(queues.jobs.to_endpoint())
                .tasks_queue(build_queue(queues)?)
                .results(Arc::new(ResultStore::new())),
        );
    } else {
        if managers.includes_jobs() {
            builders.push(
                ManagerServer::builder(queues.jobs.to_endpoint()).tasks_queue(build_queue(queues)?),
            );
        }
        if managers.includes_results() {
            builders.push(
                ManagerServer::builder(queues.results.to_endpoint())
                    .results(Arc::new(ResultStore::new())),
            );
        }
    }

    let mut handles: Vec<ServerHandle> = Vec::new();
    let mut tasks = Vec::new();
    for builder in builders {
        let server = builder.bind().await.context("Failed to start manager server")?;
        let (handle, task) = server.spawn();
        info!(address = %handle.local_addr(), "Manager ready");
        handles.push(handle);
        tasks.push(task);
    }

    tokio::select! {
        signal = wait_for_os_signal() => {
            match signal {
                Ok(signal) => info!("Received {} signal, closing managers", signal),
                Err(e) => error!("Signal listener failed: {}", e),
            }
            for handle in &handles {
                handle.close();
            }
        }
        _ = join_all(handles.iter().map(|handle| handle.closed())) => {
            info!("All managers closed remotely");
        }
    }

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Manager stopped with error: {}", e),
            Err(e) => error!("Manager task failed: {}", e),
        }
    }

    info!("Managers stopped");
    Ok(())
}
