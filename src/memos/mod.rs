//! Typed client for the Memos REST API.
//!
//! Requests are described by [`rpc::MemoRpc`] and executed here with a single
//! attempt each; there is no retry and no client-side timeout beyond what
//! `reqwest` and the network impose.

pub mod rpc;
pub mod types;

pub use rpc::{HttpCall, MemoRpc, MemoRpcResult, TranslateError};
pub use types::*;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Error reported by the Memos server for a non-success status.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct MemoApiError {
    pub message: String,
    /// HTTP status of the upstream response.
    pub status: u16,
    /// Upstream error code (numeric gRPC code or a string, depending on server).
    pub code: Option<Value>,
    pub details: Option<Value>,
}

impl MemoApiError {
    pub fn new(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status,
            code: None,
            details: None,
        }
    }

    /// Build from a status and the raw response body.
    pub fn from_response(status: u16, reason: Option<&str>, body: &[u8]) -> Self {
        #[derive(Deserialize)]
        struct ErrorBody {
            message: Option<String>,
            code: Option<Value>,
            details: Option<Value>,
        }

        let fallback = || match reason {
            Some(reason) => format!("Request failed with status {status} {reason}"),
            None => format!("Request failed with status {status}"),
        };

        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(parsed) => Self {
                message: parsed
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(fallback),
                status,
                code: parsed.code,
                details: parsed.details,
            },
            Err(_) => Self::new(fallback(), status),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] MemoApiError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Translate(#[from] TranslateError),
}

/// Connection settings for the Memos server.
#[derive(Clone)]
pub struct MemoApiConfig {
    pub base_url: String,
    pub access_token: String,
}

impl std::fmt::Debug for MemoApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoApiConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Client for `/api/v1/memos`.
#[derive(Clone, Debug)]
pub struct MemoApiClient {
    http: reqwest::Client,
    config: MemoApiConfig,
}

impl MemoApiClient {
    pub fn new(config: MemoApiConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("memos-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http_client(http, config))
    }

    pub fn with_http_client(http: reqwest::Client, mut config: MemoApiConfig) -> Self {
        let trimmed = config.base_url.trim_end_matches('/').len();
        config.base_url.truncate(trimmed);
        Self { http, config }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Execute one call: translate, send once, decode.
    pub async fn execute(&self, rpc: &MemoRpc) -> Result<MemoRpcResult, ClientError> {
        let call = rpc.to_http()?;
        let url = format!("{}{}", self.config.base_url, call.path);
        debug!(method = %call.method, url = %url, rpc = rpc.method_name(), "Calling Memos API");

        let mut builder = self
            .http
            .request(call.method.clone(), &url)
            .bearer_auth(&self.config.access_token);
        if !call.query.is_empty() {
            builder = builder.query(&call.query);
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(MemoApiError::from_response(
                status.as_u16(),
                status.canonical_reason(),
                &body,
            )
            .into());
        }

        Ok(rpc.decode(&body)?)
    }

    pub async fn list_memos(
        &self,
        req: ListMemosRequest,
    ) -> Result<ListMemosResponse, ClientError> {
        match self.execute(&MemoRpc::ListMemos(req)).await? {
            MemoRpcResult::List(list) => Ok(list),
            other => Err(unexpected("ListMemos", &other)),
        }
    }

    pub async fn get_memo(&self, name: &str) -> Result<Memo, ClientError> {
        let rpc = MemoRpc::GetMemo {
            name: name.to_string(),
        };
        self.expect_memo(&rpc).await
    }

    pub async fn create_memo(&self, req: CreateMemoRequest) -> Result<Memo, ClientError> {
        self.expect_memo(&MemoRpc::CreateMemo(req)).await
    }

    pub async fn update_memo(&self, req: UpdateMemoRequest) -> Result<Memo, ClientError> {
        self.expect_memo(&MemoRpc::UpdateMemo(req)).await
    }

    pub async fn delete_memo(&self, name: &str) -> Result<(), ClientError> {
        let rpc = MemoRpc::DeleteMemo {
            name: name.to_string(),
        };
        self.execute(&rpc).await.map(|_| ())
    }

    async fn expect_memo(&self, rpc: &MemoRpc) -> Result<Memo, ClientError> {
        match self.execute(rpc).await? {
            MemoRpcResult::Memo(memo) => Ok(memo),
            other => Err(unexpected(rpc.method_name(), &other)),
        }
    }
}

fn unexpected(method: &str, result: &MemoRpcResult) -> ClientError {
    ClientError::Translate(TranslateError::Decode(format!(
        "unexpected result for {method}: {result:?}"
    )))
}
