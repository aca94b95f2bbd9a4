//! Producer and operator commands talking to running managers

use anyhow::{anyhow, Context, Result};
use conveyor_config::ConveyorConfig;
use conveyor_core::{ServerEndpoint, TaskPayload};
use conveyor_ipc::{
    CLOSE_SERVER_ACCESSOR, RESULTS_ACCESSOR, SERVER_INFO_ACCESSOR, TASKS_QUEUE_ACCESSOR,
};
use conveyor_queue::{JobQueue, QueueItem};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

use super::{connect, same_manager};
use crate::cli::Managers;

/// Parse `--args`; no argument means an empty positional list
pub fn parse_args(args: Option<&str>) -> Result<JsonValue> {
    match args {
        Some(raw) => serde_json::from_str(raw).with_context(|| format!("Invalid JSON arguments: {}", raw)),
        None => Ok(JsonValue::Array(Vec::new())),
    }
}

pub async fn submit_command(
    config: &ConveyorConfig,
    function: &str,
    args: Option<&str>,
    id: Option<&str>,
    priority: i64,
) -> Result<()> {
    let args = parse_args(args)?;
    let payload = match id {
        Some(id) => TaskPayload::with_id(id, function, args),
        None => TaskPayload::new(function, args),
    };

    let client = connect(&config.queues.jobs.to_endpoint(), &[TASKS_QUEUE_ACCESSOR]).await?;
    client
        .tasks_queue()?
        .push_with_priority(QueueItem::task(&payload), priority)
        .await
        .context("Failed to push task")?;

    info!(task_id = %payload.id, function, priority, "Task submitted");
    println!("{}", payload.id);
    Ok(())
}

pub async fn result_command(
    config: &ConveyorConfig,
    task_id: &str,
    timeout: Option<Duration>,
) -> Result<()> {
    let client = connect(&config.queues.results.to_endpoint(), &[RESULTS_ACCESSOR]).await?;
    let results = client.results()?;

    let outcome = match timeout {
        Some(timeout) => results
            .fetch(task_id, Some(timeout))
            .await
            .with_context(|| format!("No result for {} within {:?}", task_id, timeout))?,
        None => results
            .get(task_id)
            .await
            .context("Failed to read result")?
            .ok_or_else(|| anyhow!("No result for {} yet", task_id))?,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?
    );
    Ok(())
}

/// Endpoints a command aimed at `managers` should contact
fn selected(config: &ConveyorConfig, managers: Managers) -> Vec<(&'static str, ServerEndpoint)> {
    let queues = &config.queues;
    let mut endpoints = Vec::new();
    if managers.includes_jobs() {
        endpoints.push(("jobs", queues.jobs.to_endpoint()));
    }
    if managers.includes_results() && !(managers.includes_jobs() && same_manager(queues)) {
        endpoints.push(("results", queues.results.to_endpoint()));
    }
    endpoints
}

pub async fn info_command(config: &ConveyorConfig, managers: Managers) -> Result<()> {
    for (label, endpoint) in selected(config, managers) {
        let client = connect(&endpoint, &[SERVER_INFO_ACCESSOR]).await?;
        let info = client
            .server_info()
            .await
            .with_context(|| format!("Failed to query {} manager", label))?;
        println!("{} manager:", label);
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialize server info")?
        );
    }
    Ok(())
}

pub async fn shutdown_command(config: &ConveyorConfig, managers: Managers) -> Result<()> {
    for (label, endpoint) in selected(config, managers) {
        let client = connect(&endpoint, &[CLOSE_SERVER_ACCESSOR]).await?;
        client
            .close_server()
            .await
            .with_context(|| format!("Failed to close {} manager", label))?;
        println!("Closed {} manager at {}", label, endpoint);
    }
    Ok(())
}
