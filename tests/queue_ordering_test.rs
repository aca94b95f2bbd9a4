//! Stable priority ordering across every queue flavor

use conveyor_core::{ServerEndpoint, TaskPayload};
use conveyor_ipc::{ManagerClient, ManagerServer, TASKS_QUEUE_ACCESSOR};
use conveyor_queue::{JobQueue, JournaledQueue, PriorityQueue, QueueItem};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn task(id: &str) -> QueueItem {
    QueueItem::task(&TaskPayload::with_id(id, "echo", json!([])))
}

async fn pop_id(queue: &dyn JobQueue) -> String {
    match queue.pop(Some(Duration::from_secs(1))).await.unwrap() {
        QueueItem::Task { task } => task["id"].as_str().unwrap().to_string(),
        other => panic!("unexpected item {:?}", other),
    }
}

async fn push_abc(queue: &dyn JobQueue) {
    queue.push_with_priority(task("a"), 5).await.unwrap();
    queue.push_with_priority(task("b"), 1).await.unwrap();
    queue.push_with_priority(task("c"), 5).await.unwrap();
}

#[tokio::test]
async fn test_priority_queue_orders_by_priority_then_arrival() {
    let queue = PriorityQueue::new();
    push_abc(&queue).await;

    assert_eq!(pop_id(&queue).await, "b");
    assert_eq!(pop_id(&queue).await, "a");
    assert_eq!(pop_id(&queue).await, "c");
}

#[tokio::test]
async fn test_equal_priorities_are_fifo_at_scale() {
    let queue = PriorityQueue::new();
    for n in 0..500 {
        queue.push(task(&n.to_string())).await.unwrap();
    }
    for n in 0..500 {
        assert_eq!(pop_id(&queue).await, n.to_string());
    }
}

#[tokio::test]
async fn test_journaled_queue_keeps_order_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.jsonl");

    {
        let queue = JournaledQueue::open(&path).unwrap();
        queue.push_with_priority(task("x"), 0).await.unwrap();
        push_abc(&queue).await;
        assert_eq!(pop_id(&queue).await, "x");
    }

    let queue = JournaledQueue::open(&path).unwrap();
    assert_eq!(queue.len().await.unwrap(), 3);
    assert_eq!(pop_id(&queue).await, "b");
    assert_eq!(pop_id(&queue).await, "a");
    assert_eq!(pop_id(&queue).await, "c");
}

#[tokio::test]
async fn test_remote_queue_preserves_order() {
    let queue = Arc::new(PriorityQueue::new());
    let server = ManagerServer::builder(ServerEndpoint::new("127.0.0.1", 0, "ordering"))
        .tasks_queue(queue.clone())
        .bind()
        .await
        .unwrap();
    let (handle, serving) = server.spawn();

    let client = ManagerClient::connect(handle.endpoint(), &[TASKS_QUEUE_ACCESSOR])
        .await
        .unwrap();
    let proxy = client.tasks_queue().unwrap();
    push_abc(&proxy).await;

    assert_eq!(queue.len().await.unwrap(), 3);
    assert_eq!(pop_id(&proxy).await, "b");
    assert_eq!(pop_id(&proxy).await, "a");
    assert_eq!(pop_id(&proxy).await, "c");

    handle.close();
    serving.await.unwrap().unwrap();
}
