//! worker_status tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};

use super::json_result;
use crate::host::WorkerHost;

/// Report the active and waiting generations, connected clients and bucket sizes.
pub async fn status_impl(host: &WorkerHost) -> Result<CallToolResult, McpError> {
    let status = host.registration().status().await?;
    json_result(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{config, host};
    use crate::tools::output_json;
    use wiremock::MockServer;

    #[tokio::test]
    async fn test_status_after_start() {
        let server = MockServer::start().await;
        let host = host(config(&server.uri())).await;

        let output = output_json(&status_impl(&host).await.unwrap());
        assert_eq!(output["active"]["state"], "active");
        assert_eq!(output["active"]["cache_version"], "v1");
        assert!(output["waiting"].is_null());
        assert_eq!(output["clients"], 1);
        assert_eq!(output["controlled"], 1);
        assert_eq!(output["buckets"].as_array().unwrap().len(), 3);
    }
}
