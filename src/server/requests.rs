//! MCP tool request types.
//!
//! These structs define the parameters for each MCP tool exposed by the server.

use crate::memos::rpc::memo_id;
use crate::memos::{TranslateError, Visibility};
use crate::tool_registry::Validate;
use rmcp::schemars::JsonSchema;
use serde::Deserialize;

/// Default page size when the caller does not pass one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;
/// Largest page size accepted by the list and search tools.
pub const MAX_PAGE_SIZE: u32 = 100;

fn check_page_size(page_size: Option<u32>) -> Result<(), String> {
    match page_size {
        Some(n) if !(1..=MAX_PAGE_SIZE).contains(&n) => Err(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}, got {n}"
        )),
        _ => Ok(()),
    }
}

fn check_name(name: &str) -> Result<(), String> {
    match memo_id(name) {
        Ok(_) => Ok(()),
        Err(TranslateError::InvalidPayload(reason)) => Err(reason),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateMemoParams {
    #[schemars(description = "Memo content (Markdown)")]
    pub content: String,
    #[schemars(description = "Visibility: PRIVATE (default), PROTECTED or PUBLIC")]
    pub visibility: Option<Visibility>,
}

impl Validate for CreateMemoParams {
    fn validate(&self) -> Result<(), String> {
        if self.content.trim().is_empty() {
            return Err("content must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListMemosParams {
    #[schemars(description = "Maximum memos to return (1-100, default: 10)")]
    #[serde(alias = "pageSize", alias = "limit")]
    pub page_size: Option<u32>,
    #[schemars(description = "Continuation token from a previous list_memos call")]
    #[serde(alias = "pageToken")]
    pub page_token: Option<String>,
    #[schemars(description = "Optional CEL filter, e.g. content.contains(\"todo\")")]
    pub filter: Option<String>,
}

impl Validate for ListMemosParams {
    fn validate(&self) -> Result<(), String> {
        check_page_size(self.page_size)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MemoNameParams {
    #[schemars(description = "Memo name (memos/<id>) or bare id")]
    #[serde(alias = "id")]
    pub name: String,
}

impl Validate for MemoNameParams {
    fn validate(&self) -> Result<(), String> {
        check_name(&self.name)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateMemoParams {
    #[schemars(description = "Memo name (memos/<id>) or bare id")]
    #[serde(alias = "id")]
    pub name: String,
    #[schemars(description = "New content; omit to keep the current content")]
    pub content: Option<String>,
    #[schemars(description = "New visibility; omit to keep the current visibility")]
    pub visibility: Option<Visibility>,
    #[schemars(description = "Pin or unpin; omit to keep the current state")]
    pub pinned: Option<bool>,
}

impl Validate for UpdateMemoParams {
    fn validate(&self) -> Result<(), String> {
        check_name(&self.name)?;
        if self.content.is_none() && self.visibility.is_none() && self.pinned.is_none() {
            return Err("provide at least one of content, visibility, pinned".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchMemosParams {
    #[schemars(description = "Text query to search for in memo content")]
    pub query: String,
    #[schemars(description = "Maximum number of memos to return (1-100, default: 10)")]
    #[serde(alias = "pageSize", alias = "limit")]
    pub page_size: Option<u32>,
}

impl Validate for SearchMemosParams {
    fn validate(&self) -> Result<(), String> {
        check_page_size(self.page_size)
    }
}
