//! Memos MCP Server binary
//!
//! Serves the Memos tools over stdio (default) or streamable HTTP.

use clap::Parser;
use memos_mcp::http::{self, HostCheckService, McpHttpService, MCP_PATH};
use memos_mcp::session::{RmcpSessionFactory, SessionManager, SWEEP_INTERVAL};
use memos_mcp::{
    build_registry, Cli, Config, MemoApiClient, MemoMcpServer, ShutdownCoordinator,
    TransportMode,
};
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long to wait for blocking stdio reads when the runtime is dropped.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (stdout is used for MCP protocol)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("memos_mcp=info")),
        )
        .init();

    let config = match Config::try_from(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return Err(e.into());
        }
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = rt.block_on(run(config));
    rt.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    if let Err(err) = &result {
        error!("Server error: {err:#}");
    }
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    let client = Arc::new(MemoApiClient::new(config.memo.clone())?);
    let registry = Arc::new(build_registry(client.clone())?);
    info!(
        api = %client.base_url(),
        tools = registry.len(),
        transport = ?config.transport,
        "Starting Memos MCP Server"
    );
    let server = MemoMcpServer::new(registry, client);

    let shutdown = ShutdownCoordinator::new();
    shutdown.listen_for_signals();

    match config.transport {
        TransportMode::Stdio => run_stdio(server, shutdown).await,
        TransportMode::Http => run_http(&config, server, shutdown).await,
    }
}

async fn run_stdio(server: MemoMcpServer, shutdown: ShutdownCoordinator) -> anyhow::Result<()> {
    info!("MCP server listening on stdio");
    let running = tokio::select! {
        res = server.serve_with_ct(stdio(), shutdown.token()) => {
            res.map_err(|e| anyhow::anyhow!("MCP handshake failed: {e}"))?
        }
        _ = shutdown.triggered() => {
            info!("Shutdown before a client connected");
            return Ok(());
        }
    };

    let reason = running
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server task failed: {e}"))?;
    info!(?reason, "Server stopped");
    Ok(())
}

async fn run_http(
    config: &Config,
    server: MemoMcpServer,
    shutdown: ShutdownCoordinator,
) -> anyhow::Result<()> {
    let manager = Arc::new(SessionManager::new(RmcpSessionFactory::new(server)));
    let sweeper = manager.spawn_idle_sweeper(SWEEP_INTERVAL, shutdown.token().child_token());

    if config.allowed_hosts.is_empty() {
        info!("Host allow-list is empty; accepting any Host header");
    }
    let service = HostCheckService::new(
        McpHttpService::new(manager.clone()),
        config.allowed_hosts.iter().cloned(),
    );

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed on {bind_addr}: {e}"))?;
    info!("MCP HTTP server listening on http://{bind_addr}{MCP_PATH}");

    let served = http::serve(listener, service, shutdown.token()).await;

    info!("Shutting down");
    manager.shutdown().await;
    sweeper.stop().await;
    info!("Server stopped");

    served.map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))
}
