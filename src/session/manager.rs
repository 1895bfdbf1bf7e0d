//! Session manager for the streamable HTTP transport.

use super::transport::{SessionFactory, SessionServer, SessionTransport};
use super::types::{Session, SessionState};
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sessions idle for longer than this are closed by the sweeper.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// How often the sweeper looks for idle sessions.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Error type for session management operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No valid session ID provided")]
    SessionNotFound(String),
    #[error("Server is shutting down")]
    ShuttingDown,
    #[error("Session initialization failed: {0}")]
    InitializeFailed(String),
    #[error("Session transport closed")]
    TransportClosed,
    #[error("Invalid JSON-RPC message: {0}")]
    InvalidMessage(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Server error: {0}")]
    Server(String),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

struct SessionTable<T, S> {
    sessions: HashMap<String, Session<T, S>>,
    /// Ids waiting for their initialize response. Never routable.
    provisional: HashSet<String>,
    /// Ids whose close is in progress. Inserted in the same critical section
    /// that removes the session, so only one caller ever releases it.
    closing: HashSet<String>,
    accepting: bool,
}

/// Owns every live session of the HTTP transport.
///
/// The table lock is a plain mutex and is never held across an `.await`;
/// all transport and server calls happen outside it.
pub struct SessionManager<F: SessionFactory> {
    factory: F,
    table: Mutex<SessionTable<F::Transport, F::Server>>,
    idle_timeout: Duration,
}

impl<F: SessionFactory> SessionManager<F> {
    pub fn new(factory: F) -> Self {
        Self::with_idle_timeout(factory, IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(factory: F, idle_timeout: Duration) -> Self {
        Self {
            factory,
            table: Mutex::new(SessionTable {
                sessions: HashMap::new(),
                provisional: HashSet::new(),
                closing: HashSet::new(),
                accepting: true,
            }),
            idle_timeout,
        }
    }

    fn table(&self) -> MutexGuard<'_, SessionTable<F::Transport, F::Server>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session from an `initialize` request.
    ///
    /// The session is registered only after its transport answers the
    /// request with a result; on any failure both halves are released and
    /// nothing is registered. Returns the new id and the initialize response.
    pub async fn create(self: &Arc<Self>, init: Value) -> Result<(String, Value), SessionError> {
        let session_id = Uuid::new_v4().to_string();
        {
            let mut table = self.table();
            if !table.accepting {
                return Err(SessionError::ShuttingDown);
            }
            table.provisional.insert(session_id.clone());
        }

        let (transport, server) = match self.factory.create().await {
            Ok(pair) => pair,
            Err(e) => {
                self.table().provisional.remove(&session_id);
                return Err(e);
            }
        };
        let transport = Arc::new(transport);
        debug!(session_id = %session_id, "Initializing session");

        let outcome = match transport.deliver(init).await {
            Ok(Some(response)) if response.get("result").is_some() => Ok(response),
            Ok(Some(response)) => Err(SessionError::InitializeFailed(
                response
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("initialize was rejected")
                    .to_string(),
            )),
            Ok(None) => Err(SessionError::InitializeFailed(
                "no response to initialize".to_string(),
            )),
            Err(e) => Err(e),
        };
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                self.table().provisional.remove(&session_id);
                release(&session_id, transport.as_ref(), &server).await;
                return Err(e);
            }
        };

        let session = Session::new(session_id.clone(), transport.clone(), server);
        let rejected = {
            let mut table = self.table();
            table.provisional.remove(&session_id);
            if table.accepting {
                table.sessions.insert(session_id.clone(), session);
                None
            } else {
                Some(session)
            }
        };
        if let Some(session) = rejected {
            release(&session_id, session.transport.as_ref(), &session.server).await;
            return Err(SessionError::ShuttingDown);
        }

        self.watch_transport(session_id.clone(), transport);
        info!(session_id = %session_id, "Session created");
        Ok((session_id, response))
    }

    /// Close the session when its transport closes on its own.
    fn watch_transport(self: &Arc<Self>, session_id: String, transport: Arc<F::Transport>) {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            transport.closed().await;
            if let Some(manager) = manager.upgrade() {
                if manager.close(&session_id).await {
                    debug!(session_id = %session_id, "Session closed by its transport");
                }
            }
        });
    }

    /// Transport of a tracked session, refreshing its activity time.
    pub fn route(&self, session_id: &str) -> Result<Arc<F::Transport>, SessionError> {
        let mut table = self.table();
        let session = table
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        session.touch();
        Ok(session.transport.clone())
    }

    /// Route one message to a tracked session.
    pub async fn deliver(
        &self,
        session_id: &str,
        message: Value,
    ) -> Result<Option<Value>, SessionError> {
        let transport = self.route(session_id)?;
        transport.deliver(message).await
    }

    /// Close a session. Returns `false` if the id is unknown or another
    /// caller is already closing it.
    pub async fn close(&self, session_id: &str) -> bool {
        let session = {
            let mut table = self.table();
            match table.sessions.remove(session_id) {
                Some(session) => {
                    table.closing.insert(session_id.to_string());
                    session
                }
                None => return false,
            }
        };

        let age_secs = (Utc::now() - session.info.created_at).num_seconds();
        info!(session_id = %session_id, age_secs, "Closing session");
        release(session_id, session.transport.as_ref(), &session.server).await;
        self.table().closing.remove(session_id);
        true
    }

    /// Close every session idle longer than the idle timeout.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    pub async fn sweep_at(&self, now: Instant) -> usize {
        let expired: Vec<String> = {
            let table = self.table();
            table
                .sessions
                .values()
                .filter(|s| s.idle_for(now) > self.idle_timeout)
                .map(|s| s.id().to_string())
                .collect()
        };

        let mut closed = 0;
        for session_id in expired {
            debug!(session_id = %session_id, "Session idle, closing");
            if self.close(&session_id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> IdleSweeper {
        let manager = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let closed = manager.sweep().await;
                        if closed > 0 {
                            info!(closed, remaining = manager.len(), "Idle sweep closed sessions");
                        }
                    }
                }
            }
            debug!("Idle sweeper stopped");
        });
        IdleSweeper { handle, cancel }
    }

    /// Refuse new sessions and close all existing ones.
    pub async fn shutdown(&self) {
        let session_ids: Vec<String> = {
            let mut table = self.table();
            table.accepting = false;
            table.sessions.keys().cloned().collect()
        };

        info!(sessions = session_ids.len(), "Closing all sessions");
        join_all(session_ids.iter().map(|id| self.close(id))).await;
    }

    pub fn is_accepting(&self) -> bool {
        self.table().accepting
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.table().sessions.contains_key(session_id)
    }

    /// Lifecycle state of an id, read from the table.
    ///
    /// Ids the manager no longer tracks (or never issued) read as `Closed`.
    pub fn state(&self, session_id: &str) -> SessionState {
        let table = self.table();
        if table.sessions.contains_key(session_id) {
            SessionState::Active
        } else if table.closing.contains(session_id) {
            SessionState::Closing
        } else if table.provisional.contains(session_id) {
            SessionState::Provisional
        } else {
            SessionState::Closed
        }
    }

    pub fn len(&self) -> usize {
        self.table().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().sessions.is_empty()
    }
}

/// Close both halves of a session, logging failures.
async fn release<T, S>(session_id: &str, transport: &T, server: &S)
where
    T: SessionTransport,
    S: SessionServer,
{
    if let Err(e) = transport.close().await {
        warn!(session_id = %session_id, error = %e, "Failed to close session transport");
    }
    if let Err(e) = server.close().await {
        warn!(session_id = %session_id, error = %e, "Failed to close session server");
    }
}

/// Handle to the periodic idle sweep.
pub struct IdleSweeper {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl IdleSweeper {
    /// Stop the sweep and wait for the task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Idle sweeper task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
