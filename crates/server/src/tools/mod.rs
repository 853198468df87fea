//! MCP tool implementations.
//!
//! Every tool answers with a single pretty-printed JSON text block.

pub mod cache;
pub mod worker_fetch;
pub mod worker_message;
pub mod worker_notifications;
pub mod worker_status;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::HostError;

pub use worker_fetch::{WorkerFetchParams, fetch_impl};
pub use worker_message::{WorkerMessageParams, message_impl};
pub use worker_notifications::notifications_impl;
pub use worker_status::status_impl;

pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| HostError::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) fn output_json(result: &CallToolResult) -> serde_json::Value {
    let content = serde_json::to_value(&result.content[0]).unwrap();
    let text = content.get("text").and_then(|v| v.as_str()).expect("Expected text field in content");
    serde_json::from_str(text).unwrap()
}
