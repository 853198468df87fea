//! worker_fetch tool implementation.
//!
//! Dispatches a request through the active worker as if the page had issued
//! it. Requests the worker does not intercept go straight to the network.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stowaway_worker::fetch::resolve;
use stowaway_worker::{FetchOutcome, Network, Request, Response, ResponseSource};

use super::json_result;
use crate::error::HostError;
use crate::host::WorkerHost;

/// Input parameters for worker_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerFetchParams {
    /// Absolute URL, or a path resolved against the application origin.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Request headers, in order.
    #[serde(default)]
    pub headers: Vec<HeaderParam>,

    /// Optional request body, sent as UTF-8.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HeaderParam {
    pub name: String,
    pub value: String,
}

/// Output structure for worker_fetch tool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerFetchOutput {
    /// The resolved request URL.
    pub url: String,
    /// Whether the worker handled the request.
    pub intercepted: bool,
    pub source: ResponseSource,
    pub status: u16,
    pub headers: Vec<HeaderParam>,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    /// Background tasks awaited before answering.
    pub settled: usize,
}

/// Implementation of the worker_fetch tool.
pub async fn fetch_impl(host: &WorkerHost, params: WorkerFetchParams) -> Result<CallToolResult, McpError> {
    let url = resolve(host.origin(), &params.url).map_err(|e| HostError::InvalidInput(e.to_string()))?;

    let method = params.method.trim();
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(HostError::InvalidInput(format!("invalid method: {:?}", params.method)).into());
    }

    let mut request = Request::new(method, url.as_str());
    for header in &params.headers {
        request = request.with_header(&header.name, &header.value);
    }
    if let Some(body) = params.body {
        request = request.with_body(body);
    }

    let (intercepted, response) = match host.registration().fetch(request.clone()).await? {
        FetchOutcome::Respond(response) => (true, response),
        FetchOutcome::PassThrough => (false, pass_through(host, request).await?),
    };
    let settled = host.registration().settle().await;

    tracing::debug!(url = %url, intercepted, status = response.status, source = ?response.source, "worker_fetch");

    let output = WorkerFetchOutput {
        url: url.to_string(),
        intercepted,
        source: response.source,
        status: response.status,
        headers: response.headers.iter().map(|(name, value)| HeaderParam { name: name.clone(), value: value.clone() }).collect(),
        body: response.text(),
        settled,
    };
    json_result(&output)
}

async fn pass_through(host: &WorkerHost, request: Request) -> Result<Response, HostError> {
    let url = request.url.clone();
    match tokio::time::timeout(host.pass_through_timeout(), host.network().fetch(request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(HostError::PassThroughFailed(format!("{url}: {e}"))),
        Err(_) => Err(HostError::PassThroughFailed(format!("{url}: timed out"))),
    }
}
