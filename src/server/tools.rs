//! Tool handlers: parameter mapping from MCP tool calls onto the Memos client.

use super::requests::*;
use crate::error::ToolError;
use crate::memos::{
    CreateMemoRequest, ListMemosRequest, ListMemosResponse, Memo, MemoApiClient,
    UpdateMemoRequest,
};
use crate::tool_registry::{OperationDescriptor, OperationRegistry, RegistryError};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const CREATE_MEMO: &str = "create_memo";
pub const LIST_MEMOS: &str = "list_memos";
pub const GET_MEMO: &str = "get_memo";
pub const UPDATE_MEMO: &str = "update_memo";
pub const DELETE_MEMO: &str = "delete_memo";
pub const SEARCH_MEMOS: &str = "search_memos";

/// Page size used for the `memo://recent` resource.
pub const RECENT_PAGE_SIZE: u32 = 10;

/// Build the registry of memo tools, all sharing one client.
pub fn build_registry(client: Arc<MemoApiClient>) -> Result<OperationRegistry, RegistryError> {
    let mut registry = OperationRegistry::new();

    let c = client.clone();
    registry.register(OperationDescriptor::new(
        CREATE_MEMO,
        "Create a new memo. Visibility defaults to PRIVATE.",
        move |p| create_memo(c.clone(), p),
    ))?;

    let c = client.clone();
    registry.register(OperationDescriptor::new(
        LIST_MEMOS,
        "List memos with pagination. Pass next_page_token back as page_token for the next page.",
        move |p| list_memos(c.clone(), p),
    ))?;

    let c = client.clone();
    registry.register(OperationDescriptor::new(
        GET_MEMO,
        "Get a single memo by name (memos/<id>) or id.",
        move |p| get_memo(c.clone(), p),
    ))?;

    let c = client.clone();
    registry.register(OperationDescriptor::new(
        UPDATE_MEMO,
        "Update a memo. Only the fields you pass are changed.",
        move |p| update_memo(c.clone(), p),
    ))?;

    let c = client.clone();
    registry.register(OperationDescriptor::new(
        DELETE_MEMO,
        "Delete a memo by name (memos/<id>) or id.",
        move |p| delete_memo(c.clone(), p),
    ))?;

    let c = client;
    registry.register(OperationDescriptor::new(
        SEARCH_MEMOS,
        "Search for memos by content query.",
        move |p| search_memos(c.clone(), p),
    ))?;

    Ok(registry)
}

#[instrument(skip(client, params))]
async fn create_memo(
    client: Arc<MemoApiClient>,
    params: CreateMemoParams,
) -> Result<Memo, ToolError> {
    debug!("Tool call: create_memo");
    let req = CreateMemoRequest::new(params.content)
        .with_visibility(params.visibility.unwrap_or_default());
    Ok(client.create_memo(req).await?)
}

#[instrument(skip(client))]
async fn list_memos(
    client: Arc<MemoApiClient>,
    params: ListMemosParams,
) -> Result<ListMemosResponse, ToolError> {
    debug!("Tool call: list_memos");
    let req = ListMemosRequest {
        page_size: Some(params.page_size.unwrap_or(DEFAULT_PAGE_SIZE)),
        page_token: params.page_token,
        filter: params.filter,
    };
    Ok(client.list_memos(req).await?)
}

#[instrument(skip(client), fields(name = %params.name))]
async fn get_memo(client: Arc<MemoApiClient>, params: MemoNameParams) -> Result<Memo, ToolError> {
    debug!("Tool call: get_memo");
    Ok(client.get_memo(&params.name).await?)
}

#[instrument(skip(client, params), fields(name = %params.name))]
async fn update_memo(
    client: Arc<MemoApiClient>,
    params: UpdateMemoParams,
) -> Result<Memo, ToolError> {
    debug!("Tool call: update_memo");
    let req = UpdateMemoRequest {
        name: params.name,
        content: params.content,
        visibility: params.visibility,
        pinned: params.pinned,
    };
    Ok(client.update_memo(req).await?)
}

#[instrument(skip(client), fields(name = %params.name))]
async fn delete_memo(
    client: Arc<MemoApiClient>,
    params: MemoNameParams,
) -> Result<Value, ToolError> {
    debug!("Tool call: delete_memo");
    client.delete_memo(&params.name).await?;
    Ok(json!({
        "deleted": params.name,
        "message": "Memo deleted",
    }))
}

/// One search hit, trimmed to what an agent needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub message: String,
    pub memos: Vec<SearchHit>,
}

/// Filter expression matching memos whose content contains `query`.
///
/// Returns `None` for a blank query so every memo matches.
pub fn search_filter(query: &str) -> Option<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return None;
    }
    let escaped = trimmed.replace('\\', "\\\\").replace('"', "\\\"");
    Some(format!("content.contains(\"{escaped}\")"))
}

fn to_search_hit(memo: Memo) -> Option<SearchHit> {
    if memo.name.is_empty() || memo.content.is_empty() {
        return None;
    }
    let created_at = memo.create_time?;
    Some(SearchHit {
        id: memo.id().to_string(),
        content: memo.content,
        created_at: created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Turn a list response into the search tool's result.
pub fn search_result(response: ListMemosResponse) -> SearchResult {
    let memos: Vec<SearchHit> = response.memos.into_iter().filter_map(to_search_hit).collect();
    let message = if memos.is_empty() {
        "No results found.".to_string()
    } else {
        format!("Found {} result(s).", memos.len())
    };
    SearchResult { message, memos }
}

#[instrument(skip(client, params))]
async fn search_memos(
    client: Arc<MemoApiClient>,
    params: SearchMemosParams,
) -> Result<SearchResult, ToolError> {
    debug!("Tool call: search_memos");
    let req = ListMemosRequest {
        page_size: Some(params.page_size.unwrap_or(DEFAULT_PAGE_SIZE)),
        page_token: None,
        filter: search_filter(&params.query),
    };
    let response = client.list_memos(req).await?;
    Ok(search_result(response))
}

/// Most recent memos, backing the `memo://recent` resource.
pub async fn recent_memos(client: &MemoApiClient) -> Result<ListMemosResponse, ToolError> {
    let req = ListMemosRequest {
        page_size: Some(RECENT_PAGE_SIZE),
        ..Default::default()
    };
    Ok(client.list_memos(req).await?)
}
