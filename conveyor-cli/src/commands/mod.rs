//! Subcommand implementations

pub mod client;
pub mod config;
pub mod pool;
pub mod serve;
pub mod worker;

use anyhow::{Context, Result};
use conveyor_config::{ConfigLoader, ConveyorConfig, QueuesConfig};
use conveyor_core::ServerEndpoint;
use conveyor_ipc::{IpcError, ManagerClient};
use conveyor_queue::{FifoQueue, JobQueue, JournaledQueue, PriorityQueue, QueueKind};
use conveyor_resilience::{retry_async, RetryPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Load configuration from file or use defaults
pub fn load_config(config_path: Option<&PathBuf>) -> Result<ConveyorConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                info!("Loading configuration from: {:?}", path);
                loader
                    .from_file(path)
                    .with_context(|| format!("Failed to load configuration from {:?}", path))
            } else {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

/// Build the job queue the configuration asks for
pub fn build_queue(config: &QueuesConfig) -> Result<Arc<dyn JobQueue>> {
    let queue: Arc<dyn JobQueue> = match config.queue_type {
        QueueKind::Fifo => Arc::new(FifoQueue::new()),
        QueueKind::Priority => Arc::new(PriorityQueue::new()),
        QueueKind::Journaled => {
            let path: &Path = config
                .journal_path
                .as_deref()
                .context("journal_path is required for a journaled queue")?;
            Arc::new(
                JournaledQueue::open(path)
                    .with_context(|| format!("Failed to open journal {:?}", path))?,
            )
        }
    };
    Ok(queue)
}

/// Connect to a manager, retrying transient connection failures
pub async fn connect(endpoint: &ServerEndpoint, accessors: &[&str]) -> Result<ManagerClient> {
    let policy = RetryPolicy::new(3, Duration::from_millis(500), 2.0);
    retry_async(
        &policy,
        |e: &IpcError| e.is_retryable(),
        |_attempt| ManagerClient::connect(endpoint, accessors),
    )
    .await
    .map_err(|e| e.into_inner())
    .with_context(|| format!("Failed to connect to manager at {}", endpoint))
}

/// True when both managers are configured on the same address and port
pub fn same_manager(config: &QueuesConfig) -> bool {
    config.jobs.address == config.results.address && config.jobs.port == config.results.port
}
