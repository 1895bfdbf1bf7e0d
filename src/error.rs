//! Error types for the Memos MCP server.
//!
//! Tool execution errors are returned with `is_error: true` in CallToolResult,
//! while protocol errors (unknown tool, malformed args) become JSON-RPC errors.

use crate::memos::{ClientError, MemoApiError, TranslateError};
use rmcp::model::{CallToolResult, Content};
use serde_json::json;
use thiserror::Error;

/// Tool execution errors - returned with is_error: true in CallToolResult
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Memos API error ({}): {}", .0.status, .0.message)]
    Upstream(MemoApiError),

    #[error("Memos API unreachable: {0}")]
    Unreachable(String),

    #[error("Unexpected response from Memos API: {0}")]
    BadResponse(String),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ToolError {
    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        let body = match self {
            ToolError::Upstream(err) => json!({
                "error": err.message,
                "status": err.status,
                "code": err.code,
                "details": err.details,
            }),
            other => json!({ "error": other.to_string() }),
        };
        let text = serde_json::to_string_pretty(&body).unwrap_or_else(|_| self.to_string());
        CallToolResult::error(vec![Content::text(text)])
    }

    /// The upstream HTTP status, if this error came from the Memos server.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ToolError::Upstream(err) => Some(err.status),
            _ => None,
        }
    }
}

impl From<ClientError> for ToolError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Api(err) => ToolError::Upstream(err),
            ClientError::Http(err) => ToolError::Unreachable(err.to_string()),
            ClientError::Translate(TranslateError::Decode(msg)) => ToolError::BadResponse(msg),
            ClientError::Translate(other) => ToolError::InvalidParams(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_result_carries_status_and_code() {
        let mut api = MemoApiError::new("memo not found", 404);
        api.code = Some(json!(5));
        let err = ToolError::from(ClientError::Api(api));
        assert_eq!(err.upstream_status(), Some(404));

        let result = err.to_tool_result();
        assert_eq!(result.is_error, Some(true));
        let text = serde_json::to_string(&result.content).unwrap();
        assert!(text.contains("404"));
        assert!(text.contains("memo not found"));
    }

    #[test]
    fn translate_errors_map_to_invalid_params() {
        let err = ToolError::from(ClientError::Translate(TranslateError::InvalidPayload(
            "memo name must not be empty".to_string(),
        )));
        assert!(matches!(err, ToolError::InvalidParams(_)));
        assert_eq!(err.upstream_status(), None);
    }
}
