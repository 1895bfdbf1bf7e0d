//! End-to-end tests against an in-process fake Memos API.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::http::{Method, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use memos_mcp::http::{self, McpHttpService, SESSION_ID_HEADER};
use memos_mcp::memos::{
    ClientError, CreateMemoRequest, ListMemosRequest, MemoApiClient, MemoApiConfig,
    UpdateMemoRequest,
};
use memos_mcp::session::{RmcpSessionFactory, SessionManager, SWEEP_INTERVAL};
use memos_mcp::tool_registry::InvokeError;
use memos_mcp::{build_registry, MemoMcpServer, ShutdownCoordinator, ToolError};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

const TOKEN: &str = "test-token";

/// One request as the fake server saw it.
#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Value,
}

#[derive(Default)]
struct FakeMemos {
    memos: Mutex<Vec<Value>>,
    next_id: Mutex<u64>,
    requests: Mutex<Vec<Recorded>>,
}

fn json_reply(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body.to_string())));
    *resp.status_mut() = status;
    resp
}

fn not_found() -> Response<Full<Bytes>> {
    json_reply(
        StatusCode::NOT_FOUND,
        json!({"code": 5, "message": "memo not found", "details": []}),
    )
}

/// Needle of a `content.contains("...")` filter.
fn contains_needle(filter: &str) -> Option<String> {
    let inner = filter
        .strip_prefix("content.contains(\"")?
        .strip_suffix("\")")?;
    Some(inner.replace("\\\"", "\"").replace("\\\\", "\\"))
}

impl FakeMemos {
    async fn handle(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let expected = format!("Bearer {TOKEN}");
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some(expected.as_str());
        if !authorized {
            return Ok(json_reply(
                StatusCode::UNAUTHORIZED,
                json!({"code": 16, "message": "unauthenticated"}),
            ));
        }

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query: Vec<(String, String)> = reqwest::Url::parse(&format!("http://fake{}", req.uri()))
            .map(|url| url.query_pairs().into_owned().collect())
            .unwrap_or_default();
        let bytes = req.into_body().collect().await.map(|c| c.to_bytes()).unwrap_or_default();
        let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        self.requests.lock().unwrap().push(Recorded {
            method: method.clone(),
            path: path.clone(),
            query: query.clone(),
            body: body.clone(),
        });

        let param = |key: &str| query.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        let id = path.strip_prefix("/api/v1/memos/").map(str::to_string);
        let mut memos = self.memos.lock().unwrap();

        let resp = match (method, id) {
            (Method::GET, None) if path == "/api/v1/memos" => {
                let page_size = param("pageSize").and_then(|s| s.parse().ok()).unwrap_or(50);
                let needle = param("filter").as_deref().and_then(contains_needle);
                let page: Vec<Value> = memos
                    .iter()
                    .rev()
                    .filter(|m| match &needle {
                        Some(n) => m["content"].as_str().unwrap_or("").contains(n.as_str()),
                        None => true,
                    })
                    .take(page_size)
                    .cloned()
                    .collect();
                json_reply(StatusCode::OK, json!({"memos": page, "nextPageToken": ""}))
            }
            (Method::POST, None) if path == "/api/v1/memos" => {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                let memo = json!({
                    "name": format!("memos/{next}"),
                    "uid": format!("uid{next}"),
                    "creator": "users/1",
                    "state": "NORMAL",
                    "content": body["content"],
                    "visibility": body["visibility"],
                    "pinned": false,
                    "createTime": "2024-05-01T10:00:00Z",
                    "updateTime": "2024-05-01T10:00:00Z",
                });
                memos.push(memo.clone());
                json_reply(StatusCode::OK, memo)
            }
            (method, Some(id)) => {
                let name = format!("memos/{id}");
                let index = memos.iter().position(|m| m["name"] == json!(name));
                match (method, index) {
                    (_, None) => not_found(),
                    (Method::GET, Some(i)) => json_reply(StatusCode::OK, memos[i].clone()),
                    (Method::DELETE, Some(i)) => {
                        memos.remove(i);
                        json_reply(StatusCode::OK, json!({}))
                    }
                    (Method::PATCH, Some(i)) => {
                        let target = memos[i].as_object_mut();
                        if let (Some(target), Some(update)) = (target, body.as_object()) {
                            for (k, v) in update {
                                target.insert(k.clone(), v.clone());
                            }
                        }
                        json_reply(StatusCode::OK, memos[i].clone())
                    }
                    _ => json_reply(StatusCode::METHOD_NOT_ALLOWED, json!({"message": "nope"})),
                }
            }
            _ => json_reply(StatusCode::NOT_FOUND, json!({"message": "no route"})),
        };
        Ok(resp)
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start the fake Memos API on an ephemeral port.
async fn start_fake() -> (Arc<FakeMemos>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let fake = Arc::new(FakeMemos::default());
    let state = fake.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let state = state.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req| state.clone().handle(req));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });
    (fake, addr)
}

fn client_for(addr: SocketAddr, token: &str) -> Arc<MemoApiClient> {
    Arc::new(
        MemoApiClient::new(MemoApiConfig {
            base_url: format!("http://{addr}/"),
            access_token: token.to_string(),
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn partial_update_sends_only_supplied_fields() {
    let (fake, addr) = start_fake().await;
    let client = client_for(addr, TOKEN);

    let created = client.create_memo(CreateMemoRequest::new("draft")).await.unwrap();
    let update = UpdateMemoRequest {
        content: Some("final".to_string()),
        ..UpdateMemoRequest::new(created.name.clone())
    };
    let updated = client.update_memo(update).await.unwrap();
    assert_eq!(updated.content, "final");

    let patch = fake
        .requests()
        .into_iter()
        .find(|r| r.method == Method::PATCH)
        .expect("PATCH request");
    assert_eq!(patch.path, format!("/api/v1/{}", created.name));
    assert_eq!(patch.body, json!({"content": "final"}));
    assert_eq!(
        patch.query,
        vec![("updateMask".to_string(), "content".to_string())]
    );
}

#[tokio::test]
async fn create_then_list_through_the_registry() {
    let (fake, addr) = start_fake().await;
    let registry = build_registry(client_for(addr, TOKEN)).unwrap();

    let created = registry
        .invoke("create_memo", json!({"content": "hello"}))
        .await
        .unwrap();
    assert_eq!(created["visibility"], json!("PRIVATE"));

    let listed = registry
        .invoke("list_memos", json!({"page_size": 10}))
        .await
        .unwrap();
    let memos = listed["memos"].as_array().unwrap();
    assert_eq!(memos.len(), 1);
    assert_eq!(memos[0]["content"], json!("hello"));

    let create = fake
        .requests()
        .into_iter()
        .find(|r| r.method == Method::POST)
        .unwrap();
    assert_eq!(create.body, json!({"content": "hello", "visibility": "PRIVATE"}));
    let list = fake
        .requests()
        .into_iter()
        .find(|r| r.method == Method::GET)
        .unwrap();
    assert!(list.query.contains(&("pageSize".to_string(), "10".to_string())));
}

#[tokio::test]
async fn get_after_delete_is_an_upstream_404() {
    let (_fake, addr) = start_fake().await;
    let client = client_for(addr, TOKEN);

    let memo = client.create_memo(CreateMemoRequest::new("temp")).await.unwrap();
    client.delete_memo(memo.id()).await.unwrap();

    match client.get_memo(&memo.name).await {
        Err(ClientError::Api(err)) => {
            assert_eq!(err.status, 404);
            assert_eq!(err.message, "memo not found");
            assert_eq!(err.code, Some(json!(5)));
        }
        other => panic!("expected upstream 404, got {other:?}"),
    }

    let registry = build_registry(client).unwrap();
    match registry.invoke("get_memo", json!({"name": memo.name})).await {
        Err(InvokeError::Handler(err)) => assert_eq!(err.upstream_status(), Some(404)),
        other => panic!("expected handler error, got {other:?}"),
    }
}

#[tokio::test]
async fn search_filters_by_content() {
    let (fake, addr) = start_fake().await;
    let client = client_for(addr, TOKEN);
    for content in ["buy milk", "walk the dog", r#"say "hi""#] {
        client.create_memo(CreateMemoRequest::new(content)).await.unwrap();
    }
    let registry = build_registry(client).unwrap();

    let found = registry
        .invoke("search_memos", json!({"query": "milk"}))
        .await
        .unwrap();
    assert_eq!(found["message"], json!("Found 1 result(s)."));
    assert_eq!(found["memos"][0]["content"], json!("buy milk"));
    assert_eq!(found["memos"][0]["id"], json!("1"));
    assert_eq!(found["memos"][0]["createdAt"], json!("2024-05-01T10:00:00.000Z"));

    let quoted = registry
        .invoke("search_memos", json!({"query": r#""hi""#}))
        .await
        .unwrap();
    assert_eq!(quoted["memos"].as_array().map(Vec::len), Some(1));

    let none = registry
        .invoke("search_memos", json!({"query": "cat"}))
        .await
        .unwrap();
    assert_eq!(none["message"], json!("No results found."));

    let filters: Vec<String> = fake
        .requests()
        .into_iter()
        .filter_map(|r| r.query.into_iter().find(|(k, _)| k == "filter").map(|(_, v)| v))
        .collect();
    assert_eq!(filters[0], r#"content.contains("milk")"#);
    assert_eq!(filters[1], r#"content.contains("\"hi\"")"#);
}

#[tokio::test]
async fn bad_token_surfaces_as_tool_error() {
    let (_fake, addr) = start_fake().await;
    let registry = build_registry(client_for(addr, "wrong")).unwrap();
    match registry.invoke("list_memos", json!({})).await {
        Err(InvokeError::Handler(ToolError::Upstream(err))) => {
            assert_eq!(err.status, 401);
            assert_eq!(err.message, "unauthenticated");
        }
        other => panic!("expected upstream 401, got {other:?}"),
    }
}

#[tokio::test]
async fn list_defaults_apply_when_params_are_omitted() {
    let (fake, addr) = start_fake().await;
    let client = client_for(addr, TOKEN);
    client.list_memos(ListMemosRequest::default()).await.unwrap();
    let registry = build_registry(client).unwrap();
    registry.invoke("list_memos", Value::Null).await.unwrap();

    let requests = fake.requests();
    assert!(requests[0].query.is_empty());
    assert_eq!(
        requests[1].query,
        vec![("pageSize".to_string(), "10".to_string())]
    );
}

async fn post(
    http: &reqwest::Client,
    url: &str,
    session: Option<&str>,
    body: Value,
) -> reqwest::Response {
    let mut req = http.post(url).json(&body);
    if let Some(id) = session {
        req = req.header(SESSION_ID_HEADER, id);
    }
    req.send().await.unwrap()
}

#[tokio::test]
async fn http_session_flow_and_graceful_shutdown() {
    let (fake, memos_addr) = start_fake().await;
    let client = client_for(memos_addr, TOKEN);
    let registry = Arc::new(build_registry(client.clone()).unwrap());
    let server = MemoMcpServer::new(registry, client);
    let manager = Arc::new(SessionManager::new(RmcpSessionFactory::new(server)));

    let shutdown = ShutdownCoordinator::new();
    let sweeper = manager.spawn_idle_sweeper(SWEEP_INTERVAL, shutdown.token().child_token());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/mcp", listener.local_addr().unwrap());
    let serving = tokio::spawn(http::serve(
        listener,
        McpHttpService::new(manager.clone()),
        shutdown.token(),
    ));

    let http_client = reqwest::Client::new();
    let init = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "e2e", "version": "0.0.0"}
        }
    });
    let resp = post(&http_client, &url, None, init.clone()).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let session_id = resp
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("session id");
    let body: Value = resp.json().await.unwrap();
    assert!(body["result"]["serverInfo"].is_object());

    let resp = post(
        &http_client,
        &url,
        Some(&session_id),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let resp = post(
        &http_client,
        &url,
        Some(&session_id),
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "create_memo", "arguments": {"content": "from http"}}
        }),
    )
    .await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], json!(2));
    assert_ne!(body["result"]["isError"], json!(true));
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("from http"));
    assert_eq!(fake.memos.lock().unwrap().len(), 1);

    // A second session is independent of the first.
    let resp = post(&http_client, &url, None, init).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let other = resp.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();
    assert_ne!(other, session_id);
    assert_eq!(manager.len(), 2);

    let resp = post(
        &http_client,
        &url,
        Some("00000000-0000-4000-8000-000000000000"),
        json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}),
    )
    .await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!(-32000));
    assert_eq!(manager.len(), 2);

    let resp = http_client
        .delete(&url)
        .header(SESSION_ID_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(!manager.has_session(&session_id));

    shutdown.trigger();
    serving.await.unwrap().unwrap();
    manager.shutdown().await;
    sweeper.stop().await;
    assert!(manager.is_empty());
    assert!(!manager.has_session(&other));
    assert!(!manager.is_accepting());
}
