//! Session management for the streamable HTTP transport.
//!
//! Each HTTP client that sends `initialize` gets its own session: a transport
//! paired with a dedicated protocol-server instance. The [`SessionManager`]
//! owns every live session, routes messages by id, evicts idle sessions and
//! closes everything on shutdown.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  HTTP /mcp  ──▶  McpHttpService                           │
//! │                  │ mcp-session-id                         │
//! │                  ▼                                        │
//! │                  SessionManager                           │
//! │                  ├─ sessions: HashMap<String, Session>    │
//! │                  ├─ provisional: HashSet<String>          │
//! │                  ├─ closing:  HashSet<String>             │
//! │                  └─ idle sweeper (every 5 min, 30 min TTL)│
//! └──────────────────────────────────────────────────────────┘
//!                               │ rmcp message channels
//!         ┌─────────────────────┼─────────────────────┐
//!         ▼                     ▼                     ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ MemoMcpServer│     │ MemoMcpServer│     │ MemoMcpServer│
//! │ (rmcp task)  │     │ (rmcp task)  │     │ (rmcp task)  │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

mod manager;
mod transport;
mod types;

pub use manager::{IdleSweeper, SessionError, SessionManager, IDLE_TIMEOUT, SWEEP_INTERVAL};
pub use transport::{
    ChannelTransport, RmcpSessionFactory, ServerChannel, ServerTask, SessionFactory,
    SessionServer, SessionTransport,
};
pub use types::{Session, SessionInfo, SessionState};
