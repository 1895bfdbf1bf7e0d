//! Streamable HTTP front end.
//!
//! One endpoint, `/mcp`. Sessions are identified by the `mcp-session-id`
//! header; responses are plain JSON bodies.

use crate::session::{SessionError, SessionFactory, SessionManager};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::http::{
    header::{ALLOW, CONTENT_TYPE, HOST},
    HeaderValue, Method, Request, Response, StatusCode,
};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_service::Service;
use tracing::{debug, error, info, warn};

pub const MCP_PATH: &str = "/mcp";
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// JSON-RPC error codes used in HTTP error bodies.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Transport-level rejection (no valid session, shutting down).
    pub const SERVER_ERROR: i64 = -32000;
}

const NO_VALID_SESSION: &str = "Bad Request: No valid session ID provided";

pub type HttpResponse = Response<BoxBody<Bytes, Infallible>>;
type ResponseFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Infallible>> + Send>>;

fn full(body: impl Into<Bytes>) -> BoxBody<Bytes, Infallible> {
    Full::new(body.into()).boxed()
}

fn empty(status: StatusCode) -> HttpResponse {
    let mut resp = Response::new(Empty::<Bytes>::new().boxed());
    *resp.status_mut() = status;
    resp
}

fn text(status: StatusCode, body: &'static str) -> HttpResponse {
    let mut resp = Response::new(full(body));
    *resp.status_mut() = status;
    resp
}

fn json_response(status: StatusCode, value: &Value) -> HttpResponse {
    let mut resp = Response::new(full(value.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

/// JSON-RPC error body with a null id.
pub fn jsonrpc_error(status: StatusCode, code: i64, message: impl Into<String>) -> HttpResponse {
    let body = json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message.into()},
        "id": null,
    });
    json_response(status, &body)
}

fn no_valid_session() -> HttpResponse {
    jsonrpc_error(StatusCode::BAD_REQUEST, codes::SERVER_ERROR, NO_VALID_SESSION)
}

fn invalid_message(reason: &str) -> HttpResponse {
    jsonrpc_error(
        StatusCode::BAD_REQUEST,
        codes::INVALID_REQUEST,
        format!("Invalid Request: {reason}"),
    )
}

fn internal_error() -> HttpResponse {
    jsonrpc_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        codes::INTERNAL_ERROR,
        "Internal server error",
    )
}

fn with_session_id(mut resp: HttpResponse, session_id: &str) -> HttpResponse {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        resp.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    resp
}

/// Only a JSON-RPC `initialize` request may open a session.
pub fn is_initialize_request(message: &Value) -> bool {
    message.get("method").and_then(Value::as_str) == Some("initialize")
        && message.get("id").is_some()
}

/// Routes `/mcp` requests into the session manager.
pub struct McpHttpService<F: SessionFactory> {
    manager: Arc<SessionManager<F>>,
}

impl<F: SessionFactory> Clone for McpHttpService<F> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl<F: SessionFactory> McpHttpService<F> {
    pub fn new(manager: Arc<SessionManager<F>>) -> Self {
        Self { manager }
    }

    async fn handle<B>(manager: Arc<SessionManager<F>>, req: Request<B>) -> HttpResponse
    where
        B: http_body::Body + Send + 'static,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        if req.uri().path() != MCP_PATH {
            return text(StatusCode::NOT_FOUND, "Not Found");
        }

        let session_id = req
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let method = req.method().clone();

        match (method, session_id) {
            (Method::POST, session_id) => {
                Self::handle_post(manager, session_id, req.into_body()).await
            }
            (Method::DELETE, Some(id)) => {
                if manager.close(&id).await {
                    empty(StatusCode::OK)
                } else {
                    no_valid_session()
                }
            }
            (Method::GET, Some(id)) if manager.has_session(&id) => {
                let mut resp = jsonrpc_error(
                    StatusCode::METHOD_NOT_ALLOWED,
                    codes::SERVER_ERROR,
                    "Method Not Allowed: server-initiated streams are not supported",
                );
                resp.headers_mut()
                    .insert(ALLOW, HeaderValue::from_static("POST, DELETE"));
                resp
            }
            _ => no_valid_session(),
        }
    }

    async fn handle_post<B>(
        manager: Arc<SessionManager<F>>,
        session_id: Option<String>,
        body: B,
    ) -> HttpResponse
    where
        B: http_body::Body + Send + 'static,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "Failed to read request body");
                return jsonrpc_error(StatusCode::BAD_REQUEST, codes::PARSE_ERROR, "Parse error");
            }
        };
        let message: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Rejecting unparseable body");
                return jsonrpc_error(StatusCode::BAD_REQUEST, codes::PARSE_ERROR, "Parse error");
            }
        };
        if !message.is_object() {
            return jsonrpc_error(
                StatusCode::BAD_REQUEST,
                codes::INVALID_REQUEST,
                "Invalid Request: expected a single JSON-RPC message",
            );
        }

        match session_id {
            None if is_initialize_request(&message) => Self::initialize(&manager, message).await,
            None => no_valid_session(),
            Some(id) => Self::forward(&manager, &id, message).await,
        }
    }

    async fn initialize(manager: &Arc<SessionManager<F>>, message: Value) -> HttpResponse {
        match manager.create(message).await {
            Ok((id, response)) => with_session_id(json_response(StatusCode::OK, &response), &id),
            Err(SessionError::ShuttingDown) => jsonrpc_error(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::SERVER_ERROR,
                "Server is shutting down",
            ),
            Err(SessionError::InitializeFailed(reason)) => jsonrpc_error(
                StatusCode::BAD_REQUEST,
                codes::SERVER_ERROR,
                format!("Bad Request: initialization failed: {reason}"),
            ),
            Err(SessionError::InvalidMessage(reason)) => invalid_message(&reason),
            Err(e) => {
                error!(error = %e, "Failed to create session");
                internal_error()
            }
        }
    }

    async fn forward(manager: &SessionManager<F>, id: &str, message: Value) -> HttpResponse {
        match manager.deliver(id, message).await {
            Ok(Some(response)) => with_session_id(json_response(StatusCode::OK, &response), id),
            Ok(None) => empty(StatusCode::ACCEPTED),
            Err(SessionError::SessionNotFound(_)) => no_valid_session(),
            Err(SessionError::InvalidMessage(reason)) => invalid_message(&reason),
            Err(e) => {
                error!(session_id = %id, error = %e, "Failed to deliver message");
                internal_error()
            }
        }
    }
}

impl<B, F> Service<Request<B>> for McpHttpService<F>
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
    F: SessionFactory,
{
    type Response = HttpResponse;
    type Error = Infallible;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let manager = self.manager.clone();
        Box::pin(async move { Ok(Self::handle(manager, req).await) })
    }
}

/// Rejects requests whose `Host` header is not on the allow-list with 403.
/// An empty list allows every host.
#[derive(Clone)]
pub struct HostCheckService<S> {
    inner: S,
    allowed_hosts: Arc<HashSet<String>>,
}

impl<S> HostCheckService<S> {
    pub fn new(inner: S, allowed_hosts: impl IntoIterator<Item = String>) -> Self {
        let allowed_hosts = allowed_hosts
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self {
            inner,
            allowed_hosts: Arc::new(allowed_hosts),
        }
    }
}

/// `host` matches when listed verbatim or with its port stripped.
fn host_allowed(allowed: &HashSet<String>, host: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(host) = host.map(str::to_ascii_lowercase) else {
        return false;
    };
    if allowed.contains(&host) {
        return true;
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => allowed.contains(name),
        _ => false,
    }
}

impl<B, S> Service<Request<B>> for HostCheckService<S>
where
    B: http_body::Body + Send + 'static,
    S: Service<Request<B>, Response = HttpResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = HttpResponse;
    type Error = Infallible;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let host = req.headers().get(HOST).and_then(|v| v.to_str().ok());
        if !host_allowed(&self.allowed_hosts, host) {
            warn!(host = ?host, "Rejected request for disallowed host");
            return Box::pin(async { Ok(text(StatusCode::FORBIDDEN, "Forbidden")) });
        }
        let fut = self.inner.call(req);
        Box::pin(fut)
    }
}

/// Accept connections until `shutdown` fires.
pub async fn serve<S>(
    listener: TcpListener,
    service: S,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    S: Service<Request<hyper::body::Incoming>, Response = HttpResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("HTTP server no longer accepting connections");
                return Ok(());
            }
            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new()
                        .serve_connection(io, TowerToHyperService::new(svc));
                    if let Err(err) = conn.await {
                        debug!(peer = %peer, "http connection error: {err}");
                    }
                });
            }
        }
    }
}
