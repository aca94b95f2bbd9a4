//! Manager client and proxies
//!
//! A [`ManagerClient`] owns one authenticated connection. Proxies handed out
//! by the client share that connection, so calls made through them are
//! serialized in the order they are issued.
//!
//! A caller may stop waiting on a call (a timed-out pop, a cancelled worker).
//! Its late reply is still read off the connection, and an item it carries is
//! pushed back to the server before the next call goes out.

use async_trait::async_trait;
use conveyor_core::{Outcome, ResultEntry, ServerEndpoint};
use conveyor_queue::{
    JobQueue, QueueError, QueueItem, QueueKind, QueueResult, ResultDestination, ResultMapping,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::error::{IpcError, IpcResult};
use crate::protocol::{
    AccessorInfo, AccessorKind, Call, ClientMessage, ManagerRequest, ManagerResponse,
    MessageEnvelope, Reply, ServerInfo, ServerMessage, CLOSE_SERVER_ACCESSOR, RESULTS_ACCESSOR,
    SERVER_INFO_ACCESSOR, TASKS_QUEUE_ACCESSOR,
};
use crate::transport::{IpcTransport, TcpTransport};

/// Replies owed to calls whose callers stopped waiting
#[derive(Default)]
struct Abandoned {
    calls: HashMap<Uuid, String>,
    /// Items popped for abandoned calls, waiting to be requeued
    items: Vec<(String, QueueItem, i64)>,
}

struct Connection {
    transport: Mutex<TcpTransport>,
    abandoned: parking_lot::Mutex<Abandoned>,
    /// Set when a request was cut off mid-write
    broken: AtomicBool,
}

/// Tracks one request on the wire. Dropping it before the reply arrives
/// records the call as abandoned; dropping it mid-send breaks the connection.
struct InFlight<'a> {
    connection: &'a Connection,
    correlation_id: Uuid,
    accessor: &'a str,
    sent: bool,
    answered: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        if self.sent {
            self.connection
                .abandoned
                .lock()
                .calls
                .insert(self.correlation_id, self.accessor.to_string());
        } else {
            self.connection.broken.store(true, Ordering::SeqCst);
        }
    }
}

impl Connection {
    fn new(transport: TcpTransport) -> Self {
        Self {
            transport: Mutex::new(transport),
            abandoned: parking_lot::Mutex::new(Abandoned::default()),
            broken: AtomicBool::new(false),
        }
    }

    async fn call(&self, accessor: &str, call: Call) -> IpcResult<Reply> {
        let mut transport = self.transport.lock().await;
        self.reconcile(&mut transport).await?;
        self.exchange(&mut transport, accessor, call).await
    }

    /// Flush out answers to abandoned calls and requeue any item they popped
    async fn settle(&self) -> IpcResult<()> {
        let mut transport = self.transport.lock().await;
        self.reconcile(&mut transport).await
    }

    async fn reconcile(&self, transport: &mut TcpTransport) -> IpcResult<()> {
        let outstanding = self.abandoned.lock().calls.values().next().cloned();
        if let Some(accessor) = outstanding {
            // the server answers in order, so one round trip flushes every
            // earlier reply; a blocked call is dropped when this arrives
            match self.exchange(transport, &accessor, Call::Len).await {
                Ok(_) | Err(IpcError::Remote(_)) => {}
                Err(e) => return Err(e),
            }
            self.abandoned.lock().calls.clear();
        }

        loop {
            let next = self.abandoned.lock().items.pop();
            let Some((accessor, item, priority)) = next else {
                return Ok(());
            };
            let call = Call::Requeue {
                item: item.clone(),
                priority,
            };
            match self.exchange(transport, &accessor, call).await {
                Ok(_) => info!(accessor = %accessor, priority, "Returned item popped for an abandoned call"),
                Err(e) => {
                    self.abandoned.lock().items.push((accessor, item, priority));
                    return Err(e);
                }
            }
        }
    }

    async fn exchange(
        &self,
        transport: &mut TcpTransport,
        accessor: &str,
        call: Call,
    ) -> IpcResult<Reply> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(IpcError::ConnectionClosed);
        }

        let request = ManagerRequest::new(accessor, call);
        let mut in_flight = InFlight {
            connection: self,
            correlation_id: request.correlation_id,
            accessor,
            sent: false,
            answered: false,
        };
        transport
            .send(&MessageEnvelope::new(ClientMessage::Request(request)))
            .await?;
        in_flight.sent = true;

        loop {
            let envelope: MessageEnvelope<ServerMessage> = transport.receive().await?;
            match envelope.message {
                ServerMessage::Response(response)
                    if response.correlation_id == in_flight.correlation_id =>
                {
                    in_flight.answered = true;
                    return match response.reply {
                        Reply::Failed { failure } => Err(IpcError::Remote(failure)),
                        reply => Ok(reply),
                    };
                }
                // answer to a request whose caller gave up waiting
                ServerMessage::Response(response) => self.late_reply(response),
                other => {
                    return Err(IpcError::InvalidMessage(format!(
                        "unexpected message: {:?}",
                        other
                    )))
                }
            }
        }
    }

    fn late_reply(&self, response: ManagerResponse) {
        let mut abandoned = self.abandoned.lock();
        let accessor = abandoned.calls.remove(&response.correlation_id);
        match (accessor, response.reply) {
            (Some(accessor), Reply::Item { item, priority }) => {
                debug!(
                    correlation_id = %response.correlation_id,
                    "Holding item popped for an abandoned call"
                );
                abandoned.items.push((accessor, item, priority));
            }
            _ => warn!(
                correlation_id = %response.correlation_id,
                "Skipping stale response"
            ),
        }
    }
}

fn unexpected(reply: Reply) -> IpcError {
    IpcError::InvalidMessage(format!("unexpected reply: {:?}", reply))
}

/// Authenticated connection to a manager server
#[derive(Clone)]
pub struct ManagerClient {
    connection: Arc<Connection>,
    accessors: Vec<AccessorInfo>,
    endpoint: ServerEndpoint,
}

impl ManagerClient {
    /// Connect and authenticate, registering `accessors`.
    ///
    /// Fails if the secret is wrong or any accessor is not exposed.
    pub async fn connect(endpoint: &ServerEndpoint, accessors: &[&str]) -> IpcResult<Self> {
        let mut transport = TcpTransport::connect(&endpoint.socket_address()).await?;

        let challenge: MessageEnvelope<ServerMessage> = transport.receive().await?;
        let nonce = match challenge.message {
            ServerMessage::Challenge { nonce } => nonce,
            other => {
                return Err(IpcError::InvalidMessage(format!(
                    "expected challenge, got {:?}",
                    other
                )))
            }
        };

        transport
            .send(&MessageEnvelope::new(ClientMessage::Authenticate {
                digest: auth::compute_digest(&nonce, endpoint.shared_secret()),
                accessors: accessors.iter().map(|name| name.to_string()).collect(),
            }))
            .await?;

        let answer: MessageEnvelope<ServerMessage> = transport.receive().await?;
        let granted = match answer.message {
            ServerMessage::Welcome { accessors } => accessors,
            ServerMessage::Rejected { reason } => return Err(IpcError::AuthenticationRejected(reason)),
            other => {
                return Err(IpcError::InvalidMessage(format!(
                    "expected welcome, got {:?}",
                    other
                )))
            }
        };

        debug!(%endpoint, accessors = ?accessors, "Connected to manager");
        Ok(Self {
            connection: Arc::new(Connection::new(transport)),
            accessors: granted,
            endpoint: endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Accessors granted at connect time
    pub fn accessors(&self) -> &[AccessorInfo] {
        &self.accessors
    }

    fn accessor(&self, name: &str) -> IpcResult<&AccessorInfo> {
        self.accessors
            .iter()
            .find(|info| info.name == name)
            .ok_or_else(|| IpcError::UnknownAccessor(name.to_string()))
    }

    /// Proxy for the queue registered under `name`
    pub fn queue(&self, name: &str) -> IpcResult<QueueProxy> {
        let info = self.accessor(name)?;
        match info.kind {
            AccessorKind::Queue { queue_kind } => Ok(QueueProxy {
                connection: Arc::clone(&self.connection),
                accessor: name.to_string(),
                kind: queue_kind,
            }),
            other => Err(IpcError::WrongAccessorKind {
                name: name.to_string(),
                expected: "queue".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    pub fn tasks_queue(&self) -> IpcResult<QueueProxy> {
        self.queue(TASKS_QUEUE_ACCESSOR)
    }

    /// Proxy for the result mapping registered under `name`
    pub fn mapping(&self, name: &str) -> IpcResult<ResultsProxy> {
        let info = self.accessor(name)?;
        match info.kind {
            AccessorKind::Mapping => Ok(ResultsProxy {
                connection: Arc::clone(&self.connection),
                accessor: name.to_string(),
            }),
            other => Err(IpcError::WrongAccessorKind {
                name: name.to_string(),
                expected: "mapping".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    pub fn results(&self) -> IpcResult<ResultsProxy> {
        self.mapping(RESULTS_ACCESSOR)
    }

    /// Destination matching whatever `name` exposes: a mapping or a queue
    pub fn destination(&self, name: &str) -> IpcResult<ResultDestination> {
        match self.accessor(name)?.kind {
            AccessorKind::Mapping => Ok(ResultDestination::Mapping(Arc::new(self.mapping(name)?))),
            AccessorKind::Queue { .. } => Ok(ResultDestination::Queue(Arc::new(self.queue(name)?))),
            other => Err(IpcError::WrongAccessorKind {
                name: name.to_string(),
                expected: "mapping or queue".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    pub fn results_destination(&self) -> IpcResult<ResultDestination> {
        self.destination(RESULTS_ACCESSOR)
    }

    pub async fn server_info(&self) -> IpcResult<ServerInfo> {
        self.accessor(SERVER_INFO_ACCESSOR)?;
        match self
            .connection
            .call(SERVER_INFO_ACCESSOR, Call::ServerInfo)
            .await?
        {
            Reply::ServerInfo { info } => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the server to stop
    pub async fn close_server(&self) -> IpcResult<()> {
        self.accessor(CLOSE_SERVER_ACCESSOR)?;
        match self.connection.call(CLOSE_SERVER_ACCESSOR, Call::Close).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn timeout_ms(timeout: Option<Duration>) -> Option<u64> {
    timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
}

/// Remote stand-in for a [`JobQueue`]
#[derive(Clone)]
pub struct QueueProxy {
    connection: Arc<Connection>,
    accessor: String,
    kind: QueueKind,
}

impl QueueProxy {
    pub fn accessor(&self) -> &str {
        &self.accessor
    }

    async fn call(&self, call: Call) -> QueueResult<Reply> {
        Ok(self.connection.call(&self.accessor, call).await?)
    }
}

#[async_trait]
impl JobQueue for QueueProxy {
    async fn push_with_priority(&self, item: QueueItem, priority: i64) -> QueueResult<()> {
        match self.call(Call::Push { item, priority }).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other).into()),
        }
    }

    async fn pop(&self, timeout: Option<Duration>) -> QueueResult<QueueItem> {
        Ok(self.pop_entry(timeout).await?.0)
    }

    async fn pop_entry(&self, timeout: Option<Duration>) -> QueueResult<(QueueItem, i64)> {
        match self
            .call(Call::Pop {
                timeout_ms: timeout_ms(timeout),
            })
            .await?
        {
            Reply::Item { item, priority } => Ok((item, priority)),
            other => Err(unexpected(other).into()),
        }
    }

    async fn requeue(&self, item: QueueItem, priority: i64) -> QueueResult<()> {
        match self.call(Call::Requeue { item, priority }).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other).into()),
        }
    }

    async fn purge_sentinels(&self, marker: &str) -> QueueResult<usize> {
        let call = Call::PurgeSentinels {
            marker: marker.to_string(),
        };
        match self.call(call).await? {
            Reply::Length { len } => Ok(len),
            other => Err(unexpected(other).into()),
        }
    }

    async fn settle(&self) -> QueueResult<()> {
        Ok(self.connection.settle().await?)
    }

    async fn len(&self) -> QueueResult<usize> {
        match self.call(Call::Len).await? {
            Reply::Length { len } => Ok(len),
            other => Err(unexpected(other).into()),
        }
    }

    async fn peek(&self, index: usize) -> QueueResult<Option<QueueItem>> {
        match self.call(Call::Peek { index }).await? {
            Reply::MaybeItem { item } => Ok(item),
            other => Err(unexpected(other).into()),
        }
    }

    fn kind(&self) -> QueueKind {
        self.kind
    }
}

/// Remote stand-in for a [`ResultStore`](conveyor_queue::ResultStore)
#[derive(Clone)]
pub struct ResultsProxy {
    connection: Arc<Connection>,
    accessor: String,
}

impl ResultsProxy {
    async fn call(&self, call: Call) -> QueueResult<Reply> {
        Ok(self.connection.call(&self.accessor, call).await?)
    }

    pub async fn get(&self, task_id: &str) -> QueueResult<Option<Outcome>> {
        match self
            .call(Call::GetResult {
                task_id: task_id.to_string(),
            })
            .await?
        {
            Reply::Outcome { outcome } => Ok(outcome),
            other => Err(unexpected(other).into()),
        }
    }

    /// Wait for the outcome of `task_id`; [`QueueError::NotAvailable`] on timeout
    pub async fn fetch(&self, task_id: &str, timeout: Option<Duration>) -> QueueResult<Outcome> {
        match self
            .call(Call::FetchResult {
                task_id: task_id.to_string(),
                timeout_ms: timeout_ms(timeout),
            })
            .await?
        {
            Reply::Outcome {
                outcome: Some(outcome),
            } => Ok(outcome),
            Reply::Outcome { outcome: None } => Err(QueueError::NotAvailable(task_id.to_string())),
            other => Err(unexpected(other).into()),
        }
    }

    pub async fn keys(&self) -> QueueResult<Vec<String>> {
        match self.call(Call::Keys).await? {
            Reply::Keys { keys } => Ok(keys),
            other => Err(unexpected(other).into()),
        }
    }

    pub async fn len(&self) -> QueueResult<usize> {
        match self.call(Call::Len).await? {
            Reply::Length { len } => Ok(len),
            other => Err(unexpected(other).into()),
        }
    }
}

#[async_trait]
impl ResultMapping for ResultsProxy {
    async fn set(&self, entry: ResultEntry) -> QueueResult<()> {
        match self.call(Call::SetResult { entry }).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ManagerServer, ServerHandle};
    use conveyor_core::{ErrorKind, TaskPayload};
    use conveyor_queue::{FifoQueue, PriorityQueue, ResultStore};
    use serde_json::json;

    const ALL: &[&str] = &[
        TASKS_QUEUE_ACCESSOR,
        RESULTS_ACCESSOR,
        SERVER_INFO_ACCESSOR,
        CLOSE_SERVER_ACCESSOR,
    ];

    async fn start(store: Arc<ResultStore>) -> ServerHandle {
        let server = ManagerServer::builder(ServerEndpoint::new("127.0.0.1", 0, "mykey"))
            .tasks_queue(Arc::new(PriorityQueue::new()))
            .results(store)
            .bind()
            .await
            .unwrap();
        server.spawn().0
    }

    #[tokio::test]
    async fn test_queue_proxy_matches_local_semantics() {
        let handle = start(Arc::new(ResultStore::new())).await;
        let client = ManagerClient::connect(handle.endpoint(), ALL).await.unwrap();
        let queue = client.tasks_queue().unwrap();
        assert_eq!(queue.kind(), QueueKind::Priority);

        queue.push_with_priority(QueueItem::sentinel("a"), 5).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("b"), 1).await.unwrap();
        queue.push_with_priority(QueueItem::sentinel("c"), 5).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 3);
        assert_eq!(queue.peek(0).await.unwrap(), Some(QueueItem::sentinel("b")));

        for expected in ["b", "a", "c"] {
            assert_eq!(queue.pop(None).await.unwrap(), QueueItem::sentinel(expected));
        }

        let empty = queue.pop(Some(Duration::from_millis(50))).await;
        assert!(matches!(empty, Err(QueueError::Empty)));
        handle.close();
    }

    #[tokio::test]
    async fn test_results_proxy_round_trip() {
        let store = Arc::new(ResultStore::new());
        let handle = start(store.clone()).await;
        let client = ManagerClient::connect(handle.endpoint(), &[RESULTS_ACCESSOR])
            .await
            .unwrap();
        let results = client.results().unwrap();

        results
            .set(ResultEntry::new("t1", Outcome::value(json!(6))))
            .await
            .unwrap();
        // visible locally as soon as set returns
        assert_eq!(store.get("t1"), Some(Outcome::value(json!(6))));
        assert_eq!(results.get("t1").await.unwrap(), Some(Outcome::value(json!(6))));
        assert_eq!(results.keys().await.unwrap(), vec!["t1".to_string()]);
        assert_eq!(results.len().await.unwrap(), 1);

        let missing = results.fetch("t2", Some(Duration::from_millis(50))).await;
        assert!(matches!(missing, Err(QueueError::NotAvailable(id)) if id == "t2"));

        assert!(matches!(
            client.tasks_queue(),
            Err(IpcError::UnknownAccessor(_))
        ));
        handle.close();
    }

    #[tokio::test]
    async fn test_remote_pop_competes_with_local_pop() {
        let queue = Arc::new(FifoQueue::new());
        let server = ManagerServer::builder(ServerEndpoint::new("127.0.0.1", 0, "mykey"))
            .tasks_queue(queue.clone())
            .bind()
            .await
            .unwrap();
        let (handle, _task) = server.spawn();

        let client = ManagerClient::connect(handle.endpoint(), &[TASKS_QUEUE_ACCESSOR])
            .await
            .unwrap();
        let remote = client.tasks_queue().unwrap();

        for i in 0..20 {
            let payload = TaskPayload::with_id(format!("t{}", i), "echo", json!([i]));
            queue.push(QueueItem::task(&payload)).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(remote.pop(None).await.unwrap());
            seen.push(queue.pop(None).await.unwrap());
        }
        let mut ids: Vec<_> = seen
            .iter()
            .map(|item| match item {
                QueueItem::Task { task } => task["id"].as_str().unwrap().to_string(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        handle.close();
    }

    #[tokio::test]
    async fn test_results_queue_destination() {
        let results_queue = Arc::new(FifoQueue::new());
        let server = ManagerServer::builder(ServerEndpoint::new("127.0.0.1", 0, "mykey"))
            .results_queue(results_queue.clone())
            .bind()
            .await
            .unwrap();
        let (handle, _task) = server.spawn();

        let client = ManagerClient::connect(handle.endpoint(), &[RESULTS_ACCESSOR])
            .await
            .unwrap();
        let destination = client.results_destination().unwrap();
        assert!(matches!(destination, ResultDestination::Queue(_)));

        let entry = ResultEntry::new("t1", Outcome::error(ErrorKind::UnknownFunction, "nope"));
        destination.record(entry.clone()).await.unwrap();
        assert_eq!(
            results_queue.pop(None).await.unwrap(),
            QueueItem::results(vec![entry])
        );
        handle.close();
    }

    #[tokio::test]
    async fn test_item_popped_for_abandoned_call_is_returned() {
        let handle = start(Arc::new(ResultStore::new())).await;
        let client = ManagerClient::connect(handle.endpoint(), ALL).await.unwrap();
        let producer = ManagerClient::connect(handle.endpoint(), ALL).await.unwrap();
        let queue = client.tasks_queue().unwrap();

        // abandon a pop that is still waiting on the server
        let abandoned = tokio::time::timeout(Duration::from_millis(50), queue.pop(None)).await;
        assert!(abandoned.is_err());

        producer
            .tasks_queue()
            .unwrap()
            .push_with_priority(QueueItem::sentinel("late"), 3)
            .await
            .unwrap();

        // the late item is back in the queue before the next call runs
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(
            queue.pop_entry(None).await.unwrap(),
            (QueueItem::sentinel("late"), 3)
        );
        handle.close();
    }

    #[tokio::test]
    async fn test_dropped_client_leaves_late_item_queued() {
        let queue = Arc::new(PriorityQueue::new());
        let server = ManagerServer::builder(ServerEndpoint::new("127.0.0.1", 0, "mykey"))
            .tasks_queue(queue.clone())
            .bind()
            .await
            .unwrap();
        let (handle, _task) = server.spawn();

        let client = ManagerClient::connect(handle.endpoint(), &[TASKS_QUEUE_ACCESSOR])
            .await
            .unwrap();
        let proxy = client.tasks_queue().unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(50), proxy.pop(None)).await;
        assert!(abandoned.is_err());
        drop(proxy);
        drop(client);

        queue.push(QueueItem::sentinel("late")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.len().await.unwrap(), 1);
        handle.close();
    }

    #[tokio::test]
    async fn test_settle_returns_item_without_another_call() {
        let queue = Arc::new(PriorityQueue::new());
        let server = ManagerServer::builder(ServerEndpoint::new("127.0.0.1", 0, "mykey"))
            .tasks_queue(queue.clone())
            .bind()
            .await
            .unwrap();
        let (handle, _task) = server.spawn();

        let client = ManagerClient::connect(handle.endpoint(), &[TASKS_QUEUE_ACCESSOR])
            .await
            .unwrap();
        let proxy = client.tasks_queue().unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(50), proxy.pop(None)).await;
        assert!(abandoned.is_err());

        queue.push(QueueItem::sentinel("late")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        proxy.settle().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);

        // nothing left to reconcile
        proxy.settle().await.unwrap();
        assert_eq!(proxy.len().await.unwrap(), 1);
        handle.close();
    }

    #[tokio::test]
    async fn test_purge_sentinels_through_proxy() {
        let handle = start(Arc::new(ResultStore::new())).await;
        let client = ManagerClient::connect(handle.endpoint(), ALL).await.unwrap();
        let queue = client.tasks_queue().unwrap();

        queue.push(QueueItem::sentinel("keep")).await.unwrap();
        queue.push(QueueItem::sentinel("-STOP-")).await.unwrap();
        queue.push(QueueItem::sentinel("-STOP-")).await.unwrap();

        assert_eq!(queue.purge_sentinels("-STOP-").await.unwrap(), 2);
        assert_eq!(queue.len().await.unwrap(), 1);
        handle.close();
    }

    #[tokio::test]
    async fn test_server_info_and_close() {
        let handle = start(Arc::new(ResultStore::new())).await;
        let client = ManagerClient::connect(handle.endpoint(), ALL).await.unwrap();

        let info = client.server_info().await.unwrap();
        assert_eq!(info.address, "127.0.0.1");
        assert_eq!(info.port, handle.local_addr().port());
        assert_eq!(info.accessors.len(), 4);

        client.close_server().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_wrong_secret_fails_connect() {
        let handle = start(Arc::new(ResultStore::new())).await;
        let wrong = ServerEndpoint::new("127.0.0.1", handle.local_addr().port(), "nope");

        let result = ManagerClient::connect(&wrong, ALL).await;
        assert!(matches!(result, Err(IpcError::AuthenticationRejected(_))));
        handle.close();
    }
}
