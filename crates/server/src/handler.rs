//! MCP server handler implementation.
//!
//! Routes tool calls to the worker host.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::host::WorkerHost;
use crate::tools::cache::{CacheGetParams, get_impl};
use crate::tools::{
    WorkerFetchParams, WorkerMessageParams, fetch_impl, message_impl, notifications_impl, status_impl,
};

/// The MCP server handler for stowaway.
#[derive(Clone)]
pub struct StowawayServer {
    host: Arc<WorkerHost>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl StowawayServer {
    pub fn new(host: Arc<WorkerHost>) -> Self {
        Self { host, tool_router: Self::tool_router() }
    }

    /// Dispatch a request through the active worker.
    #[tool(
        description = "Dispatch an HTTP request through the active offline worker, as if the page issued it. Returns status, headers, body and whether it came from network, cache or a synthesized fallback."
    )]
    async fn worker_fetch(&self, params: Parameters<WorkerFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.host, params.0).await
    }

    #[tool(
        description = "Post a foreground message to the worker: SKIP_WAITING, CACHE_CLEAR, CACHE_URLS {urls} or GET_VERSION."
    )]
    async fn worker_message(&self, params: Parameters<WorkerMessageParams>) -> Result<CallToolResult, McpError> {
        message_impl(&self.host, params.0).await
    }

    #[tool(description = "Show the active and waiting worker generations, connected clients and cache buckets.")]
    async fn worker_status(&self) -> Result<CallToolResult, McpError> {
        status_impl(&self.host).await
    }

    #[tool(description = "Drain notifications the worker broadcast to clients since the last call.")]
    async fn worker_notifications(&self) -> Result<CallToolResult, McpError> {
        notifications_impl(&self.host).await
    }

    #[tool(description = "Look up a cached response by URL and method, in one bucket or all of them.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        get_impl(self.host.registration().db(), self.host.origin(), params.0).await
    }
}

impl ServerHandler for StowawayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "stowaway".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{config, host};
    use wiremock::MockServer;

    #[tokio::test]
    async fn test_tool_list() {
        let server = MockServer::start().await;
        let handler = StowawayServer::new(host(config(&server.uri())).await);

        let mut names: Vec<String> = handler.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, ["cache_get", "worker_fetch", "worker_message", "worker_notifications", "worker_status"]);
        assert_eq!(handler.get_info().server_info.name, "stowaway");
    }
}
