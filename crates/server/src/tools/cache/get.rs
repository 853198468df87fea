//! cache_get tool implementation.
//!
//! Looks up a stored response by method and URL, in one bucket or all of them.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stowaway_core::{CacheDb, Error};
use stowaway_worker::fetch::resolve;
use url::Url;

use crate::error::HostError;
use crate::tools::json_result;

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Absolute URL, or a path resolved against the application origin.
    pub url: String,

    /// HTTP method the entry was stored under (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Restrict the lookup to one bucket. All buckets are searched otherwise.
    #[serde(default)]
    pub bucket: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetOutput {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    pub body_bytes: usize,
    pub stored_at: String,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(cache: &CacheDb, origin: &Url, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let url = resolve(origin, &params.url).map_err(|e| HostError::InvalidInput(e.to_string()))?;
    let method = params.method.trim().to_ascii_uppercase();

    let entry = match &params.bucket {
        Some(bucket) => cache.match_entry(bucket, &method, url.as_str()).await?,
        None => cache.match_any(&method, url.as_str()).await?,
    }
    .ok_or_else(|| Error::CacheMiss(format!("{method} {url}")))?;

    let output = CacheGetOutput {
        method: entry.method,
        url: entry.url,
        status: entry.status,
        headers: entry.headers,
        body: String::from_utf8_lossy(&entry.body).into_owned(),
        body_bytes: entry.body.len(),
        stored_at: entry.stored_at,
    };
    json_result(&output)
}
