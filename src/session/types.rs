//! Session and session info types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;

/// Lifecycle state of a session, as reported by
/// [`SessionManager::state`](super::SessionManager::state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed, waiting for the initialization response. Not yet routable.
    Provisional,
    /// Registered and accepting requests.
    Active,
    /// Removed from routing; transport and server are being released.
    Closing,
    /// Fully released, or not known to the manager.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Provisional => write!(f, "provisional"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Information about a session (serializable for logs and diagnostics).
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Unique session identifier (UUID v4).
    pub id: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// A live session: one transport bound to one protocol server.
pub struct Session<T, S> {
    pub info: SessionInfo,
    /// Refreshed each time a request is routed to this session.
    pub last_activity: Instant,
    pub transport: Arc<T>,
    pub server: S,
}

impl<T, S> Session<T, S> {
    pub fn new(id: String, transport: Arc<T>, server: S) -> Self {
        Self {
            info: SessionInfo {
                id,
                created_at: Utc::now(),
            },
            last_activity: Instant::now(),
            transport,
            server,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Mark the session as used now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// How long the session has been idle as of `now`.
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_activity)
    }
}
