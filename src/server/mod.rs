//! MCP server exposing Memos tools.

mod requests;
pub mod tools;

pub use requests::*;
pub use tools::build_registry;

use crate::memos::MemoApiClient;
use crate::tool_registry::{InvokeError, OperationRegistry};
use rmcp::model::{
    AnnotateAble, CallToolRequestParams, CallToolResult, Content, ErrorCode,
    ListResourcesResult, ListToolsResult, PaginatedRequestParams, RawResource,
    ReadResourceRequestParams, ReadResourceResult, ResourceContents, ServerCapabilities,
    ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// URI of the recent-memos resource.
pub const RECENT_MEMOS_URI: &str = "memo://recent";

/// MCP server for one client. Cheap to clone; the registry and REST client
/// are shared by every instance.
#[derive(Clone)]
pub struct MemoMcpServer {
    registry: Arc<OperationRegistry>,
    client: Arc<MemoApiClient>,
}

impl MemoMcpServer {
    pub fn new(registry: Arc<OperationRegistry>, client: Arc<MemoApiClient>) -> Self {
        debug!(tools = registry.len(), "Creating Memos MCP server");
        Self { registry, client }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    fn instructions(&self) -> String {
        "Memos note-taking server.\n\n\
         Tools:\n\
         - create_memo: write a new memo (Markdown)\n\
         - list_memos: page through memos, newest first\n\
         - get_memo / update_memo / delete_memo: work on one memo by name (memos/<id>) or id\n\
         - search_memos: find memos whose content contains a query\n\n\
         Resource memo://recent returns the latest memos as JSON."
            .to_string()
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        let payload = Value::Object(arguments.unwrap_or_default());
        match self.registry.invoke(name, payload).await {
            Ok(value) => Ok(CallToolResult::success(vec![Content::text(
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            )])),
            Err(InvokeError::MethodNotFound(name)) => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("Unknown tool: {name}"),
                None,
            )),
            Err(InvokeError::InvalidParams(msg)) => Err(McpError::invalid_params(msg, None)),
            Err(InvokeError::Handler(err)) => {
                warn!(tool = name, error = %err, "Tool call failed");
                Ok(err.to_tool_result())
            }
        }
    }
}

impl ServerHandler for MemoMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self.registry.list().iter().map(|d| d.to_tool()).collect();
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        info!(tool = %params.name, "Tool call");
        self.invoke(&params.name, params.arguments).await
    }

    async fn list_resources(
        &self,
        _params: Option<PaginatedRequestParams>,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let mut recent = RawResource::new(RECENT_MEMOS_URI, "recent-memos".to_string());
        recent.description = Some("The most recent memos".to_string());
        recent.mime_type = Some("application/json".to_string());
        Ok(ListResourcesResult {
            resources: vec![recent.no_annotation()],
            next_cursor: None,
            meta: None,
        })
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParams,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        if params.uri != RECENT_MEMOS_URI {
            return Err(McpError::resource_not_found(
                format!("Unknown resource: {}", params.uri),
                None,
            ));
        }
        let recent = tools::recent_memos(&self.client)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let text = serde_json::to_string_pretty(&recent)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, params.uri)],
        })
    }
}
