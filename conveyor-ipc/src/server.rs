//! Manager server
//!
//! The server owns the shared objects. Each accepted connection becomes a
//! session: challenge, authenticate, then a sequential request/response loop.
//! Sessions run concurrently, so a blocking pop on one connection never stalls
//! another.
//!
//! While a call blocks, the session keeps reading. A new frame or a hang-up
//! means the caller gave up, so the call is dropped before it takes anything.
//! A popped item that cannot be delivered goes back to the front of its queue.

use conveyor_core::ServerEndpoint;
use conveyor_queue::{JobQueue, QueueItem, QueueResult, ResultMapping, ResultStore};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::error::{IpcError, IpcResult};
use crate::protocol::{
    AccessorInfo, AccessorKind, Call, ClientMessage, FailureKind, ManagerRequest,
    ManagerResponse, MessageEnvelope, Reply, ServerInfo, ServerMessage, CLOSE_SERVER_ACCESSOR,
    RESULTS_ACCESSOR, SERVER_INFO_ACCESSOR, TASKS_QUEUE_ACCESSOR,
};
use crate::transport::{IpcTransport, TcpTransport};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

enum Exposed {
    Queue(Arc<dyn JobQueue>),
    Mapping(Arc<ResultStore>),
    ServerInfo,
    Control,
}

impl Exposed {
    fn kind(&self) -> AccessorKind {
        match self {
            Exposed::Queue(queue) => AccessorKind::Queue {
                queue_kind: queue.kind(),
            },
            Exposed::Mapping(_) => AccessorKind::Mapping,
            Exposed::ServerInfo => AccessorKind::ServerInfo,
            Exposed::Control => AccessorKind::Control,
        }
    }
}

/// Collects the objects a server exposes. The set is fixed by [`bind`](Self::bind).
pub struct ManagerServerBuilder {
    endpoint: ServerEndpoint,
    accessors: BTreeMap<String, Exposed>,
}

impl ManagerServerBuilder {
    /// Expose `queue` as `get_tasks_queue`
    pub fn tasks_queue(self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue(TASKS_QUEUE_ACCESSOR, queue)
    }

    /// Expose `store` as `get_results`
    pub fn results(self, store: Arc<ResultStore>) -> Self {
        self.mapping(RESULTS_ACCESSOR, store)
    }

    /// Expose a queue as `get_results`, for deployments that collect
    /// outcomes through a results queue
    pub fn results_queue(self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue(RESULTS_ACCESSOR, queue)
    }

    pub fn queue(mut self, name: impl Into<String>, queue: Arc<dyn JobQueue>) -> Self {
        self.accessors.insert(name.into(), Exposed::Queue(queue));
        self
    }

    pub fn mapping(mut self, name: impl Into<String>, store: Arc<ResultStore>) -> Self {
        self.accessors.insert(name.into(), Exposed::Mapping(store));
        self
    }

    /// Bind the listener. Port 0 picks a free port; see [`ManagerServer::local_addr`].
    pub async fn bind(mut self) -> IpcResult<ManagerServer> {
        for reserved in [SERVER_INFO_ACCESSOR, CLOSE_SERVER_ACCESSOR] {
            if self.accessors.contains_key(reserved) {
                warn!(accessor = reserved, "Reserved accessor name overridden");
            }
        }
        self.accessors
            .insert(SERVER_INFO_ACCESSOR.to_string(), Exposed::ServerInfo);
        self.accessors
            .insert(CLOSE_SERVER_ACCESSOR.to_string(), Exposed::Control);

        let address = self.endpoint.socket_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| IpcError::BindFailed {
                endpoint: address.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let info = ServerInfo {
            address: self.endpoint.address().to_string(),
            port: local_addr.port(),
            accessors: self
                .accessors
                .iter()
                .map(|(name, exposed)| AccessorInfo {
                    name: name.clone(),
                    kind: exposed.kind(),
                })
                .collect(),
        };

        info!(
            endpoint = %self.endpoint.with_port(local_addr.port()),
            accessors = ?self.accessors.keys().collect::<Vec<_>>(),
            "Manager server listening"
        );

        Ok(ManagerServer {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                endpoint: self.endpoint.with_port(local_addr.port()),
                accessors: self.accessors,
                info,
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

struct Shared {
    endpoint: ServerEndpoint,
    accessors: BTreeMap<String, Exposed>,
    info: ServerInfo,
    shutdown: CancellationToken,
}

/// A bound manager server; call [`serve`](Self::serve) to start accepting
pub struct ManagerServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

/// Cloneable control handle for a running server
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Stop accepting; sessions end after their in-flight request
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint clients should connect to (with the bound port)
    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.shared.endpoint
    }

    pub fn info(&self) -> &ServerInfo {
        &self.shared.info
    }

    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await
    }
}

impl ManagerServer {
    pub fn builder(endpoint: ServerEndpoint) -> ManagerServerBuilder {
        ManagerServerBuilder {
            endpoint,
            accessors: BTreeMap::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
            local_addr: self.local_addr,
        }
    }

    /// Accept connections until closed, then wait for open sessions to end
    pub async fn serve(self) -> IpcResult<()> {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Accepted connection");
                        sessions.spawn(run_session(Arc::clone(&self.shared), stream, peer));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "Session task failed");
                    }
                }
            }
        }

        drop(self.listener);
        info!(sessions = sessions.len(), "Manager server closing");
        while let Some(finished) = sessions.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "Session task failed");
            }
        }
        info!("Manager server stopped");
        Ok(())
    }

    /// Serve until the returned handle (or a client) closes the server
    pub fn spawn(self) -> (ServerHandle, tokio::task::JoinHandle<IpcResult<()>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.serve()))
    }
}

async fn run_session(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let mut transport = match TcpTransport::new(stream) {
        Ok(transport) => transport,
        Err(e) => {
            warn!(%peer, error = %e, "Failed to set up session");
            return;
        }
    };

    let registered = match shared.handshake(&mut transport).await {
        Ok(registered) => registered,
        Err(e) => {
            warn!(%peer, error = %e, "Handshake failed");
            let _ = transport.close().await;
            return;
        }
    };
    debug!(%peer, accessors = ?registered, "Session authenticated");

    let mut pending = None;
    loop {
        let received = match pending.take() {
            Some(received) => received,
            None => tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                received = transport.receive::<ClientMessage>() => received,
            },
        };

        let request = match received {
            Ok(envelope) => match envelope.message {
                ClientMessage::Request(request) => request,
                ClientMessage::Authenticate { .. } => {
                    warn!(%peer, "Unexpected authentication after handshake");
                    break;
                }
            },
            Err(IpcError::ConnectionClosed) => {
                debug!(%peer, "Client disconnected");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "Failed to read request");
                break;
            }
        };

        let reply = tokio::select! {
            biased;
            reply = shared.dispatch(&registered, &request) => reply,
            next = transport.receive::<ClientMessage>() => {
                debug!(%peer, call = request.call.name(), "Caller abandoned request");
                pending = Some(next);
                continue;
            }
            _ = shared.shutdown.cancelled() => {
                Reply::failed(FailureKind::Closing, "server is shutting down")
            }
        };

        let undelivered = match &reply {
            Reply::Item { item, priority } => Some((item.clone(), *priority)),
            _ => None,
        };
        if let Some((item, priority)) = &undelivered {
            if transport.peer_moved_on() {
                debug!(%peer, "Caller left before its item was sent");
                shared
                    .return_undelivered(&request.accessor, item.clone(), *priority)
                    .await;
                continue;
            }
        }

        let response = ServerMessage::Response(ManagerResponse {
            correlation_id: request.correlation_id,
            reply,
        });
        if let Err(e) = transport.send(&MessageEnvelope::new(response)).await {
            warn!(%peer, error = %e, "Failed to send response");
            if let Some((item, priority)) = undelivered {
                shared.return_undelivered(&request.accessor, item, priority).await;
            }
            break;
        }
    }

    let _ = transport.close().await;
}

impl Shared {
    async fn handshake(&self, transport: &mut TcpTransport) -> IpcResult<HashSet<String>> {
        let nonce = auth::generate_nonce();
        transport
            .send(&MessageEnvelope::new(ServerMessage::Challenge {
                nonce: nonce.clone(),
            }))
            .await?;

        let envelope: MessageEnvelope<ClientMessage> =
            timeout(HANDSHAKE_TIMEOUT, transport.receive())
                .await
                .map_err(|_| IpcError::Timeout)??;

        let (digest, requested) = match envelope.message {
            ClientMessage::Authenticate { digest, accessors } => (digest, accessors),
            ClientMessage::Request(_) => {
                return reject(transport, IpcError::InvalidMessage("expected authentication".to_string()))
                    .await;
            }
        };

        if !auth::verify_digest(&nonce, self.endpoint.shared_secret(), &digest) {
            return reject(
                transport,
                IpcError::AuthenticationRejected("authentication failed".to_string()),
            )
            .await;
        }

        let mut granted = Vec::with_capacity(requested.len());
        for name in &requested {
            match self.accessors.get(name) {
                Some(exposed) => granted.push(AccessorInfo {
                    name: name.clone(),
                    kind: exposed.kind(),
                }),
                None => return reject(transport, IpcError::UnknownAccessor(name.clone())).await,
            }
        }

        transport
            .send(&MessageEnvelope::new(ServerMessage::Welcome { accessors: granted }))
            .await?;
        Ok(requested.into_iter().collect())
    }

    async fn dispatch(&self, registered: &HashSet<String>, request: &ManagerRequest) -> Reply {
        let exposed = match self.accessors.get(&request.accessor) {
            Some(exposed) if registered.contains(&request.accessor) => exposed,
            _ => {
                return Reply::failed(
                    FailureKind::UnknownAccessor,
                    format!("accessor '{}' is not registered", request.accessor),
                )
            }
        };

        let result: QueueResult<Reply> = match (exposed, &request.call) {
            (Exposed::Queue(queue), Call::Push { item, priority }) => queue
                .push_with_priority(item.clone(), *priority)
                .await
                .map(|_| Reply::Done),
            (Exposed::Queue(queue), Call::Pop { timeout_ms }) => queue
                .pop_entry(timeout_ms.map(Duration::from_millis))
                .await
                .map(|(item, priority)| Reply::Item { item, priority }),
            (Exposed::Queue(queue), Call::Len) => queue.len().await.map(|len| Reply::Length { len }),
            (Exposed::Queue(queue), Call::Peek { index }) => {
                queue.peek(*index).await.map(|item| Reply::MaybeItem { item })
            }
            (Exposed::Queue(queue), Call::Requeue { item, priority }) => queue
                .requeue(item.clone(), *priority)
                .await
                .map(|_| Reply::Done),
            (Exposed::Queue(queue), Call::PurgeSentinels { marker }) => queue
                .purge_sentinels(marker)
                .await
                .map(|len| Reply::Length { len }),
            (Exposed::Mapping(store), Call::SetResult { entry }) => {
                store.set(entry.clone()).await.map(|_| Reply::Done)
            }
            (Exposed::Mapping(store), Call::GetResult { task_id }) => Ok(Reply::Outcome {
                outcome: store.get(task_id),
            }),
            (Exposed::Mapping(store), Call::FetchResult { task_id, timeout_ms }) => store
                .fetch(task_id, timeout_ms.map(Duration::from_millis))
                .await
                .map(|outcome| Reply::Outcome {
                    outcome: Some(outcome),
                }),
            (Exposed::Mapping(store), Call::Keys) => Ok(Reply::Keys { keys: store.keys() }),
            (Exposed::Mapping(store), Call::Len) => Ok(Reply::Length { len: store.len() }),
            (Exposed::ServerInfo, Call::ServerInfo) => Ok(Reply::ServerInfo {
                info: self.info.clone(),
            }),
            (Exposed::Control, Call::Close) => {
                info!("Close requested by client");
                self.shutdown.cancel();
                Ok(Reply::Done)
            }
            (exposed, call) => {
                return Reply::failed(
                    FailureKind::Unsupported,
                    format!("{} does not support {}", exposed.kind(), call.name()),
                )
            }
        };

        result.unwrap_or_else(|e| Reply::Failed { failure: e.into() })
    }

    async fn return_undelivered(&self, accessor: &str, item: QueueItem, priority: i64) {
        let Some(Exposed::Queue(queue)) = self.accessors.get(accessor) else {
            return;
        };
        match queue.requeue(item, priority).await {
            Ok(()) => info!(accessor, priority, "Requeued undelivered item"),
            Err(e) => error!(accessor, error = %e, "Failed to requeue undelivered item"),
        }
    }
}

async fn reject<T>(transport: &mut TcpTransport, error: IpcError) -> IpcResult<T> {
    let reason = error.to_string();
    // the peer may already be gone
    let _ = transport
        .send(&MessageEnvelope::new(ServerMessage::Rejected { reason }))
        .await;
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_queue::PriorityQueue;

    async fn spawn_server(secret: &str) -> ServerHandle {
        let server = ManagerServer::builder(ServerEndpoint::new("127.0.0.1", 0, secret))
            .tasks_queue(Arc::new(PriorityQueue::new()))
            .results(Arc::new(ResultStore::new()))
            .bind()
            .await
            .unwrap();
        let (handle, _task) = server.spawn();
        handle
    }

    async fn authenticate(
        handle: &ServerHandle,
        secret: &str,
        accessors: &[&str],
    ) -> (TcpTransport, ServerMessage) {
        let mut transport = TcpTransport::connect(&handle.local_addr().to_string())
            .await
            .unwrap();
        let challenge: MessageEnvelope<ServerMessage> = transport.receive().await.unwrap();
        let ServerMessage::Challenge { nonce } = challenge.message else {
            panic!("expected challenge");
        };
        transport
            .send(&MessageEnvelope::new(ClientMessage::Authenticate {
                digest: auth::compute_digest(&nonce, secret),
                accessors: accessors.iter().map(|s| s.to_string()).collect(),
            }))
            .await
            .unwrap();
        let answer: MessageEnvelope<ServerMessage> = transport.receive().await.unwrap();
        (transport, answer.message)
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let handle = spawn_server("mykey").await;
        let (mut transport, answer) = authenticate(&handle, "wrong", &[TASKS_QUEUE_ACCESSOR]).await;

        assert!(matches!(answer, ServerMessage::Rejected { .. }));
        let next: Result<MessageEnvelope<ServerMessage>, _> = transport.receive().await;
        assert!(matches!(next, Err(IpcError::ConnectionClosed)));
        handle.close();
    }

    #[tokio::test]
    async fn test_unexposed_accessor_is_rejected() {
        let handle = spawn_server("mykey").await;
        let (_transport, answer) = authenticate(&handle, "mykey", &["get_nothing"]).await;
        assert!(
            matches!(answer, ServerMessage::Rejected { reason } if reason.contains("get_nothing"))
        );
        handle.close();
    }

    #[tokio::test]
    async fn test_requests_limited_to_registered_accessors() {
        let handle = spawn_server("mykey").await;
        let (mut transport, answer) =
            authenticate(&handle, "mykey", &[TASKS_QUEUE_ACCESSOR]).await;
        let ServerMessage::Welcome { accessors } = answer else {
            panic!("expected welcome");
        };
        assert_eq!(accessors.len(), 1);
        assert_eq!(accessors[0].name, TASKS_QUEUE_ACCESSOR);

        let request = ManagerRequest::new(RESULTS_ACCESSOR, Call::Keys);
        transport
            .send(&MessageEnvelope::new(ClientMessage::Request(request.clone())))
            .await
            .unwrap();
        let response: MessageEnvelope<ServerMessage> = transport.receive().await.unwrap();
        let ServerMessage::Response(response) = response.message else {
            panic!("expected response");
        };
        assert_eq!(response.correlation_id, request.correlation_id);
        assert!(matches!(
            response.reply,
            Reply::Failed { failure } if failure.kind == FailureKind::UnknownAccessor
        ));
        handle.close();
    }

    async fn request(transport: &mut TcpTransport, call: Call) -> ManagerRequest {
        let request = ManagerRequest::new(TASKS_QUEUE_ACCESSOR, call);
        transport
            .send(&MessageEnvelope::new(ClientMessage::Request(request.clone())))
            .await
            .unwrap();
        request
    }

    async fn settled_len(queue: &PriorityQueue, expected: usize) -> usize {
        for _ in 0..50 {
            if queue.len().await.unwrap() == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        queue.len().await.unwrap()
    }

    async fn spawn_with_queue(queue: Arc<PriorityQueue>) -> ServerHandle {
        let server = ManagerServer::builder(ServerEndpoint::new("127.0.0.1", 0, "mykey"))
            .tasks_queue(queue)
            .bind()
            .await
            .unwrap();
        server.spawn().0
    }

    #[tokio::test]
    async fn test_hang_up_during_pop_takes_nothing() {
        let queue = Arc::new(PriorityQueue::new());
        let handle = spawn_with_queue(queue.clone()).await;
        let (mut transport, _) = authenticate(&handle, "mykey", &[TASKS_QUEUE_ACCESSOR]).await;

        request(&mut transport, Call::Pop { timeout_ms: None }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(transport);

        queue.push_with_priority(QueueItem::sentinel("late"), 4).await.unwrap();
        assert_eq!(settled_len(&queue, 1).await, 1);
        assert_eq!(queue.pop_entry(None).await.unwrap(), (QueueItem::sentinel("late"), 4));
        handle.close();
    }

    #[tokio::test]
    async fn test_new_request_supersedes_blocked_pop() {
        let queue = Arc::new(PriorityQueue::new());
        let handle = spawn_with_queue(queue.clone()).await;
        let (mut transport, _) = authenticate(&handle, "mykey", &[TASKS_QUEUE_ACCESSOR]).await;

        let abandoned = request(&mut transport, Call::Pop { timeout_ms: None }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let len = request(&mut transport, Call::Len).await;
        queue.push(QueueItem::sentinel("late")).await.unwrap();

        let response: MessageEnvelope<ServerMessage> = transport.receive().await.unwrap();
        let ServerMessage::Response(response) = response.message else {
            panic!("expected response");
        };
        // the blocked pop never answers
        assert_ne!(response.correlation_id, abandoned.correlation_id);
        assert_eq!(response.correlation_id, len.correlation_id);
        assert_eq!(settled_len(&queue, 1).await, 1);
        handle.close();
    }

    #[tokio::test]
    async fn test_info_reports_bound_port_without_secret() {
        let handle = spawn_server("supersecret").await;
        let info = handle.info();

        assert_eq!(info.port, handle.local_addr().port());
        assert_ne!(info.port, 0);
        let names: Vec<_> = info.accessors.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec![CLOSE_SERVER_ACCESSOR, RESULTS_ACCESSOR, SERVER_INFO_ACCESSOR, TASKS_QUEUE_ACCESSOR]
        );
        assert!(!serde_json::to_string(info).unwrap().contains("supersecret"));
        handle.close();
    }
}
