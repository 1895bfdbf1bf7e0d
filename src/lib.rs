//! Memos MCP Server
//!
//! This library provides an MCP (Model Context Protocol) server for the
//! Memos note-taking service. It lets LLM agents create, read, update,
//! delete and search memos through the Memos REST API.
//!
//! # Architecture
//!
//! - **MemoApiClient**: Typed REST client. Each call is described by a
//!   [`memos::MemoRpc`] value, translated to one HTTP request and sent once.
//!
//! - **OperationRegistry**: Named operations with JSON schemas, built once
//!   at startup and shared by every server instance.
//!
//! - **MemoMcpServer**: The `rmcp` server handler advertising the registry's
//!   tools and the `memo://recent` resource.
//!
//! - **SessionManager**: HTTP mode only. One `MemoMcpServer` per session,
//!   idle eviction and graceful shutdown.
//!
//! # Tools
//!
//! - `create_memo`: Create a memo (visibility defaults to PRIVATE)
//! - `list_memos`: List memos with pagination
//! - `get_memo`: Fetch one memo by name or id
//! - `update_memo`: Change content, visibility or pinned state
//! - `delete_memo`: Delete a memo
//! - `search_memos`: Find memos whose content contains a query

pub mod config;
pub mod error;
pub mod http;
pub mod memos;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod tool_registry;

pub use config::{Cli, Config, ConfigError, TransportMode};
pub use error::ToolError;
pub use memos::{MemoApiClient, MemoApiConfig, MemoApiError};
pub use server::{build_registry, MemoMcpServer};
pub use session::{SessionError, SessionManager};
pub use shutdown::ShutdownCoordinator;
pub use tool_registry::{OperationDescriptor, OperationRegistry};
