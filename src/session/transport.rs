//! Per-session transport and protocol-server seams.
//!
//! The HTTP front end hands each inbound JSON-RPC message to a
//! [`SessionTransport`]. In production the transport is a pair of typed
//! message channels whose other ends are served by an `rmcp` server task,
//! so every session gets its own [`MemoMcpServer`] with its own handshake
//! state.

use super::manager::SessionError;
use crate::server::MemoMcpServer;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use rmcp::model::{ClientJsonRpcMessage, RequestId, ServerJsonRpcMessage};
use rmcp::ServiceExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Messages buffered in each direction between a transport and its server.
const CHANNEL_CAPACITY: usize = 32;
/// How long a server task gets to wind down before it is aborted.
const SERVER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Message channel of one session.
pub trait SessionTransport: Send + Sync + 'static {
    /// Deliver one inbound JSON-RPC message.
    ///
    /// Requests resolve to their response; notifications and responses
    /// resolve to `None` once handed over.
    fn deliver(
        &self,
        message: Value,
    ) -> impl Future<Output = Result<Option<Value>, SessionError>> + Send;

    /// Resolves once the transport has closed, for any reason.
    fn closed(&self) -> impl Future<Output = ()> + Send;

    fn close(&self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Protocol-server instance bound to one transport.
pub trait SessionServer: Send + Sync + 'static {
    fn close(&self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Builds a connected transport/server pair for a new session.
pub trait SessionFactory: Send + Sync + 'static {
    type Transport: SessionTransport;
    type Server: SessionServer;

    fn create(
        &self,
    ) -> impl Future<Output = Result<(Self::Transport, Self::Server), SessionError>> + Send;
}

/// Server half of a [`ChannelTransport`], served by `rmcp` as a sink/stream pair.
pub type ServerChannel = (
    mpsc::Sender<ServerJsonRpcMessage>,
    mpsc::Receiver<ClientJsonRpcMessage>,
);

type Waiters = HashMap<RequestId, oneshot::Sender<ServerJsonRpcMessage>>;
type Pending = Arc<Mutex<Waiters>>;

/// Client half of an in-memory `rmcp` channel.
///
/// Inbound values are decoded into [`ClientJsonRpcMessage`] before they
/// reach the server. Responses are matched to the waiting request by id.
pub struct ChannelTransport {
    outbound: Mutex<Option<mpsc::Sender<ClientJsonRpcMessage>>>,
    pending: Pending,
    closed: CancellationToken,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelTransport {
    /// A transport and the channel pair its server should be served on.
    pub fn pair() -> (Self, ServerChannel) {
        let (client_tx, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (server_tx, server_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pending: Pending = Arc::default();
        let closed = CancellationToken::new();
        let router = tokio::spawn(route_responses(server_rx, pending.clone(), closed.clone()));
        let transport = Self {
            outbound: Mutex::new(Some(client_tx)),
            pending,
            closed,
            router: Mutex::new(Some(router)),
        };
        (transport, (server_tx, client_rx))
    }

    async fn send(&self, message: ClientJsonRpcMessage) -> Result<(), SessionError> {
        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(mut sender) = sender else {
            return Err(SessionError::TransportClosed);
        };
        sender
            .send(message)
            .await
            .map_err(|_| SessionError::TransportClosed)
    }

    fn pending(&self) -> MutexGuard<'_, Waiters> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hand each server response to the `deliver` call waiting on its id.
async fn route_responses(
    mut inbound: mpsc::Receiver<ServerJsonRpcMessage>,
    pending: Pending,
    closed: CancellationToken,
) {
    while let Some(message) = inbound.next().await {
        let id = match &message {
            ServerJsonRpcMessage::Response(response) => Some(response.id.clone()),
            ServerJsonRpcMessage::Error(error) => Some(error.id.clone()),
            _ => None,
        };
        let waiter = id.and_then(|id| {
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id)
        });
        match waiter {
            Some(tx) => {
                let _ = tx.send(message);
            }
            // No standalone event stream to carry server-initiated traffic.
            None => debug!(?message, "Dropping server-initiated message"),
        }
    }
    closed.cancel();
    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
}

impl SessionTransport for ChannelTransport {
    async fn deliver(&self, message: Value) -> Result<Option<Value>, SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::TransportClosed);
        }
        let message: ClientJsonRpcMessage = serde_json::from_value(message)
            .map_err(|e| SessionError::InvalidMessage(e.to_string()))?;

        let request_id = match &message {
            ClientJsonRpcMessage::Request(request) => Some(request.id.clone()),
            _ => None,
        };
        let Some(id) = request_id else {
            self.send(message).await?;
            return Ok(None);
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending();
            if pending.contains_key(&id) {
                return Err(SessionError::Transport(format!(
                    "request id {id:?} is already in flight"
                )));
            }
            pending.insert(id.clone(), tx);
        }

        if let Err(e) = self.send(message).await {
            self.pending().remove(&id);
            return Err(e);
        }

        let response = tokio::select! {
            response = rx => response.map_err(|_| SessionError::TransportClosed)?,
            _ = self.closed.cancelled() => {
                self.pending().remove(&id);
                return Err(SessionError::TransportClosed);
            }
        };
        serde_json::to_value(response)
            .map(Some)
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }

    async fn close(&self) -> Result<(), SessionError> {
        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut sender) = sender {
            sender.close_channel();
        }
        self.closed.cancel();
        let router = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(router) = router {
            router.abort();
        }
        self.pending().clear();
        Ok(())
    }
}

/// Handle to a spawned `rmcp` server task.
pub struct ServerTask {
    ct: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionServer for ServerTask {
    async fn close(&self) -> Result<(), SessionError> {
        self.ct.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut task) = task else {
            return Ok(());
        };
        match tokio::time::timeout(SERVER_CLOSE_TIMEOUT, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(SessionError::Server(e.to_string())),
            Err(_) => {
                task.abort();
                Err(SessionError::Server("server task did not stop in time".to_string()))
            }
        }
    }
}

/// Production factory: a fresh [`MemoMcpServer`] behind a [`ChannelTransport`].
#[derive(Clone)]
pub struct RmcpSessionFactory {
    server: MemoMcpServer,
}

impl RmcpSessionFactory {
    pub fn new(server: MemoMcpServer) -> Self {
        Self { server }
    }
}

impl SessionFactory for RmcpSessionFactory {
    type Transport = ChannelTransport;
    type Server = ServerTask;

    async fn create(&self) -> Result<(ChannelTransport, ServerTask), SessionError> {
        let (transport, channel) = ChannelTransport::pair();
        let ct = CancellationToken::new();
        let server = self.server.clone();
        let server_ct = ct.clone();
        let task = tokio::spawn(async move {
            match server.serve_with_ct(channel, server_ct).await {
                Ok(running) => match running.waiting().await {
                    Ok(reason) => debug!(?reason, "Session server stopped"),
                    Err(e) => warn!(error = %e, "Session server task failed"),
                },
                Err(e) => debug!(error = %e, "Session handshake did not complete"),
            }
        });

        Ok((
            transport,
            ServerTask {
                ct,
                task: Mutex::new(Some(task)),
            },
        ))
    }
}
