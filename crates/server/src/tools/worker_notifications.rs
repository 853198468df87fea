//! worker_notifications tool implementation.
//!
//! The MCP caller is the host's only client. Broadcasts queue up until drained here.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use serde::Serialize;
use stowaway_core::ClientMessage;

use super::json_result;
use crate::host::WorkerHost;

#[derive(Debug, Clone, Serialize)]
pub struct WorkerNotificationsOutput {
    pub messages: Vec<ClientMessage>,
}

/// Drain every message broadcast since the last call.
pub async fn notifications_impl(host: &WorkerHost) -> Result<CallToolResult, McpError> {
    let messages = host.drain_messages().await;
    json_result(&WorkerNotificationsOutput { messages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{config, host, unreachable_origin};
    use crate::tools::output_json;
    use crate::tools::worker_fetch::{WorkerFetchParams, fetch_impl};

    #[tokio::test]
    async fn test_notifications_are_drained() {
        let host = host(config(&unreachable_origin())).await;

        let params =
            WorkerFetchParams { url: "/api/items".into(), method: "GET".into(), headers: Vec::new(), body: None };
        fetch_impl(&host, params).await.unwrap();

        let output = output_json(&notifications_impl(&host).await.unwrap());
        let messages = output["messages"].as_array().unwrap();
        assert_eq!(messages[0]["type"], "controller-changed");
        assert_eq!(messages[1]["type"], "af-pwa-notification");
        assert_eq!(messages[1]["data"]["type"], "network_error");
        assert_eq!(messages[1]["data"]["code"], "OFFLINE");

        let output = output_json(&notifications_impl(&host).await.unwrap());
        assert!(output["messages"].as_array().unwrap().is_empty());
    }
}
