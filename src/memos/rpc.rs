//! Translation between typed memo calls and REST requests.
//!
//! Each [`MemoRpc`] variant maps to exactly one HTTP call against
//! `/api/v1/memos[/<id>]` and knows how to decode the matching response body.
//! Nothing here performs I/O; [`super::MemoApiClient`] executes the calls.

use super::types::*;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Collection endpoint for memos.
pub const MEMOS_PATH: &str = "/api/v1/memos";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// One outbound REST call, fully described.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl HttpCall {
    fn new(method: Method, path: String) -> Self {
        Self {
            method,
            path,
            query: Vec::new(),
            body: None,
        }
    }
}

/// The closed set of supported remote calls.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoRpc {
    ListMemos(ListMemosRequest),
    GetMemo { name: String },
    CreateMemo(CreateMemoRequest),
    UpdateMemo(UpdateMemoRequest),
    DeleteMemo { name: String },
}

/// Decoded result of a [`MemoRpc`].
#[derive(Debug, Clone, PartialEq)]
pub enum MemoRpcResult {
    Memo(Memo),
    List(ListMemosResponse),
    Deleted,
}

// Payload shapes accepted by `MemoRpc::from_method`.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPayload {
    page_size: Option<u32>,
    page_token: Option<String>,
    filter: Option<String>,
}

#[derive(Deserialize)]
struct NamePayload {
    name: String,
}

#[derive(Deserialize)]
struct CreatePayload {
    memo: CreateMemoFields,
}

#[derive(Deserialize)]
struct CreateMemoFields {
    content: String,
    visibility: Option<Visibility>,
}

#[derive(Deserialize)]
struct UpdatePayload {
    memo: UpdateMemoFields,
}

#[derive(Deserialize)]
struct UpdateMemoFields {
    name: String,
    content: Option<String>,
    visibility: Option<Visibility>,
    pinned: Option<bool>,
}

fn parse<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, TranslateError> {
    serde_json::from_value(payload).map_err(|e| TranslateError::InvalidPayload(e.to_string()))
}

/// Extract the id from a memo name, accepting `memos/<id>` or a bare `<id>`.
///
/// The id becomes one path segment of the request URL, so only ASCII
/// letters, digits, `-` and `_` are accepted. Anything else, dot segments
/// and percent escapes included, is rejected before a URL is built.
pub fn memo_id(name: &str) -> Result<&str, TranslateError> {
    let trimmed = name.trim();
    let id = trimmed.strip_prefix(MEMO_NAME_PREFIX).unwrap_or(trimmed);
    if id.is_empty() {
        return Err(TranslateError::InvalidPayload(
            "memo name must not be empty".to_string(),
        ));
    }
    if !id.bytes().all(is_id_byte) {
        return Err(TranslateError::InvalidPayload(format!(
            "invalid memo name: {name:?}"
        )));
    }
    Ok(id)
}

fn is_id_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn item_path(name: &str) -> Result<String, TranslateError> {
    Ok(format!("{MEMOS_PATH}/{}", memo_id(name)?))
}

impl MemoRpc {
    /// Method name as used by [`MemoRpc::from_method`].
    pub fn method_name(&self) -> &'static str {
        match self {
            MemoRpc::ListMemos(_) => "ListMemos",
            MemoRpc::GetMemo { .. } => "GetMemo",
            MemoRpc::CreateMemo(_) => "CreateMemo",
            MemoRpc::UpdateMemo(_) => "UpdateMemo",
            MemoRpc::DeleteMemo { .. } => "DeleteMemo",
        }
    }

    /// Build a call from a method name and a JSON payload.
    pub fn from_method(method: &str, payload: Value) -> Result<Self, TranslateError> {
        let payload = if payload.is_null() {
            Value::Object(Default::default())
        } else {
            payload
        };
        match method {
            "ListMemos" => {
                let p: ListPayload = parse(payload)?;
                Ok(MemoRpc::ListMemos(ListMemosRequest {
                    page_size: p.page_size,
                    page_token: p.page_token,
                    filter: p.filter,
                }))
            }
            "GetMemo" => {
                let p: NamePayload = parse(payload)?;
                Ok(MemoRpc::GetMemo { name: p.name })
            }
            "CreateMemo" => {
                let p: CreatePayload = parse(payload)?;
                Ok(MemoRpc::CreateMemo(CreateMemoRequest {
                    content: p.memo.content,
                    visibility: p.memo.visibility.unwrap_or_default(),
                }))
            }
            "UpdateMemo" => {
                let p: UpdatePayload = parse(payload)?;
                Ok(MemoRpc::UpdateMemo(UpdateMemoRequest {
                    name: p.memo.name,
                    content: p.memo.content,
                    visibility: p.memo.visibility,
                    pinned: p.memo.pinned,
                }))
            }
            "DeleteMemo" => {
                let p: NamePayload = parse(payload)?;
                Ok(MemoRpc::DeleteMemo { name: p.name })
            }
            other => Err(TranslateError::MethodNotFound(other.to_string())),
        }
    }

    /// Describe the REST call for this request.
    pub fn to_http(&self) -> Result<HttpCall, TranslateError> {
        match self {
            MemoRpc::ListMemos(req) => {
                let mut call = HttpCall::new(Method::GET, MEMOS_PATH.to_string());
                if let Some(size) = req.page_size {
                    call.query.push(("pageSize", size.to_string()));
                }
                if let Some(token) = req.page_token.as_deref().filter(|t| !t.is_empty()) {
                    call.query.push(("pageToken", token.to_string()));
                }
                if let Some(filter) = req.filter.as_deref().filter(|f| !f.is_empty()) {
                    call.query.push(("filter", filter.to_string()));
                }
                Ok(call)
            }
            MemoRpc::GetMemo { name } => Ok(HttpCall::new(Method::GET, item_path(name)?)),
            MemoRpc::DeleteMemo { name } => Ok(HttpCall::new(Method::DELETE, item_path(name)?)),
            MemoRpc::CreateMemo(req) => {
                if req.content.trim().is_empty() {
                    return Err(TranslateError::InvalidPayload(
                        "content must not be empty".to_string(),
                    ));
                }
                let mut call = HttpCall::new(Method::POST, MEMOS_PATH.to_string());
                call.body = Some(
                    serde_json::to_value(req)
                        .map_err(|e| TranslateError::InvalidPayload(e.to_string()))?,
                );
                Ok(call)
            }
            MemoRpc::UpdateMemo(req) => {
                let mask = req.update_mask();
                if mask.is_empty() {
                    return Err(TranslateError::InvalidPayload(
                        "update requires at least one of content, visibility, pinned".to_string(),
                    ));
                }
                let mut call = HttpCall::new(Method::PATCH, item_path(&req.name)?);
                call.query.push(("updateMask", mask.join(",")));
                call.body = Some(
                    serde_json::to_value(req)
                        .map_err(|e| TranslateError::InvalidPayload(e.to_string()))?,
                );
                Ok(call)
            }
        }
    }

    /// Decode a success response body for this call.
    pub fn decode(&self, body: &[u8]) -> Result<MemoRpcResult, TranslateError> {
        let decode_err = |e: serde_json::Error| TranslateError::Decode(e.to_string());
        match self {
            MemoRpc::ListMemos(_) => {
                if body.iter().all(u8::is_ascii_whitespace) {
                    return Ok(MemoRpcResult::List(ListMemosResponse::default()));
                }
                serde_json::from_slice(body)
                    .map(MemoRpcResult::List)
                    .map_err(decode_err)
            }
            MemoRpc::GetMemo { .. } | MemoRpc::CreateMemo(_) | MemoRpc::UpdateMemo(_) => {
                serde_json::from_slice(body)
                    .map(MemoRpcResult::Memo)
                    .map_err(decode_err)
            }
            MemoRpc::DeleteMemo { .. } => Ok(MemoRpcResult::Deleted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_carries_only_supplied_query_params() {
        let rpc = MemoRpc::ListMemos(ListMemosRequest {
            page_size: Some(10),
            page_token: None,
            filter: None,
        });
        let call = rpc.to_http().unwrap();
        assert_eq!(call.method, Method::GET);
        assert_eq!(call.path, "/api/v1/memos");
        assert_eq!(call.query, vec![("pageSize", "10".to_string())]);
        assert!(call.body.is_none());
    }

    #[test]
    fn get_and_delete_join_id_onto_collection() {
        let get = MemoRpc::GetMemo {
            name: "memos/abc".to_string(),
        };
        assert_eq!(get.to_http().unwrap().path, "/api/v1/memos/abc");

        let delete = MemoRpc::DeleteMemo {
            name: "1".to_string(),
        };
        let call = delete.to_http().unwrap();
        assert_eq!(call.method, Method::DELETE);
        assert_eq!(call.path, "/api/v1/memos/1");
    }

    #[test]
    fn create_defaults_visibility_to_private() {
        let rpc = MemoRpc::from_method("CreateMemo", json!({"memo": {"content": "new memo"}}))
            .unwrap();
        let call = rpc.to_http().unwrap();
        assert_eq!(call.method, Method::POST);
        assert_eq!(
            call.body,
            Some(json!({"content": "new memo", "visibility": "PRIVATE"}))
        );
    }

    #[test]
    fn update_sends_only_supplied_fields() {
        let mut req = UpdateMemoRequest::new("memos/1");
        req.content = Some("x".to_string());
        let call = MemoRpc::UpdateMemo(req).to_http().unwrap();

        assert_eq!(call.method, Method::PATCH);
        assert_eq!(call.path, "/api/v1/memos/1");
        assert_eq!(call.body, Some(json!({"content": "x"})));
        assert_eq!(call.query, vec![("updateMask", "content".to_string())]);
    }

    #[test]
    fn update_distinguishes_false_from_absent() {
        let rpc = MemoRpc::from_method(
            "UpdateMemo",
            json!({"memo": {"name": "memos/9", "pinned": false}}),
        )
        .unwrap();
        let call = rpc.to_http().unwrap();
        assert_eq!(call.body, Some(json!({"pinned": false})));
    }

    #[test]
    fn missing_required_fields_fail_before_translation() {
        let err = MemoRpc::from_method("GetMemo", json!({})).unwrap_err();
        assert!(matches!(err, TranslateError::InvalidPayload(_)));

        let err = MemoRpc::from_method("CreateMemo", json!({"memo": {}})).unwrap_err();
        assert!(matches!(err, TranslateError::InvalidPayload(_)));

        let rpc = MemoRpc::GetMemo {
            name: "memos/".to_string(),
        };
        assert!(matches!(
            rpc.to_http(),
            Err(TranslateError::InvalidPayload(_))
        ));
    }

    #[test]
    fn ids_that_would_leave_the_collection_are_rejected() {
        let hostile = [
            ".",
            "..",
            "..\\users\\1",
            "%2e%2e",
            "memos/..\\..\\auth\\sessions",
            "memos/.",
            "a/b",
            "1?x=y",
            "1#frag",
            "1\n",
            "1\u{0}",
            "caf\u{e9}",
            "memos/",
            "  ",
        ];
        for name in hostile {
            let calls = [
                MemoRpc::GetMemo {
                    name: name.to_string(),
                },
                MemoRpc::DeleteMemo {
                    name: name.to_string(),
                },
                MemoRpc::UpdateMemo(UpdateMemoRequest {
                    content: Some("x".to_string()),
                    ..UpdateMemoRequest::new(name)
                }),
            ];
            for rpc in calls {
                assert!(
                    matches!(rpc.to_http(), Err(TranslateError::InvalidPayload(_))),
                    "{} accepted {name:?}",
                    rpc.method_name()
                );
            }
        }
    }

    #[test]
    fn plain_ids_pass_through() {
        for (name, id) in [("memos/Ab-9_z", "Ab-9_z"), ("42", "42"), (" memos/7 ", "7")] {
            assert_eq!(memo_id(name).unwrap(), id);
        }
    }

    #[test]
    fn unknown_method_is_not_a_payload_error() {
        let err = MemoRpc::from_method("ArchiveMemo", json!({})).unwrap_err();
        assert_eq!(err, TranslateError::MethodNotFound("ArchiveMemo".to_string()));
    }

    #[test]
    fn decodes_per_variant() {
        let list = MemoRpc::ListMemos(ListMemosRequest::default());
        let decoded = list
            .decode(br#"{"memos":[{"name":"memos/1","content":"hello"}],"nextPageToken":"t"}"#)
            .unwrap();
        match decoded {
            MemoRpcResult::List(resp) => {
                assert_eq!(resp.memos.len(), 1);
                assert_eq!(resp.memos[0].content, "hello");
                assert_eq!(resp.next_page_token.as_deref(), Some("t"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let delete = MemoRpc::DeleteMemo {
            name: "1".to_string(),
        };
        assert_eq!(delete.decode(b"").unwrap(), MemoRpcResult::Deleted);
    }
}
