//! worker_message tool implementation.
//!
//! Posts a foreground message to the registration. `GET_VERSION` is given a
//! reply port and the reply is returned alongside the outcome.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stowaway_core::{InboundMessage, VersionReply};
use stowaway_worker::MessageOutcome;
use tokio::sync::oneshot;

use super::json_result;
use crate::host::WorkerHost;

/// Input parameters for worker_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerMessageParams {
    /// Message envelope, e.g. `{"type": "CACHE_URLS", "payload": {"urls": ["/a"]}}`.
    pub message: InboundMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerMessageOutput {
    pub outcome: MessageOutcome,
    /// What arrived on the reply port, if one was given.
    pub reply: Option<VersionReply>,
}

/// Implementation of the worker_message tool.
pub async fn message_impl(host: &WorkerHost, params: WorkerMessageParams) -> Result<CallToolResult, McpError> {
    let (port, reply) = match params.message {
        InboundMessage::GetVersion => {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        }
        _ => (None, None),
    };

    let outcome = host.registration().post_message(params.message, port).await?;
    let reply = match reply {
        Some(rx) => rx.await.ok(),
        None => None,
    };

    json_result(&WorkerMessageOutput { outcome, reply })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{config, host};
    use crate::tools::output_json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message(json: &str) -> WorkerMessageParams {
        WorkerMessageParams { message: serde_json::from_str(json).unwrap() }
    }

    #[tokio::test]
    async fn test_get_version() {
        let server = MockServer::start().await;
        let mut cfg = config(&server.uri());
        cfg.cache_version = "v3".into();
        let host = host(cfg).await;

        let output = output_json(&message_impl(&host, message(r#"{"type":"GET_VERSION"}"#)).await.unwrap());
        assert_eq!(output["reply"], serde_json::json!({"type": "VERSION", "version": "v3"}));
        assert_eq!(output["outcome"]["outcome"], "version");
    }

    #[tokio::test]
    async fn test_cache_clear_twice() {
        let server = MockServer::start().await;
        let host = host(config(&server.uri())).await;

        let first = output_json(&message_impl(&host, message(r#"{"type":"CACHE_CLEAR"}"#)).await.unwrap());
        assert_eq!(first["outcome"]["buckets"], 3);
        let second = output_json(&message_impl(&host, message(r#"{"type":"CLEAR_CACHE"}"#)).await.unwrap());
        assert_eq!(second["outcome"]["buckets"], 0);
        assert!(second["reply"].is_null());
    }

    #[tokio::test]
    async fn test_cache_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/help"))
            .respond_with(ResponseTemplate::new(200).set_body_string("help"))
            .mount(&server)
            .await;
        let host = host(config(&server.uri())).await;

        let output = output_json(
            &message_impl(&host, message(r#"{"type":"CACHE_URLS","payload":{"urls":["/help","/gone"]}}"#))
                .await
                .unwrap(),
        );
        assert_eq!(output["outcome"]["cached"], serde_json::json!(["/help"]));
        assert_eq!(output["outcome"]["failed"], serde_json::json!(["/gone"]));

        let url = format!("{}/help", server.uri());
        assert!(host.registration().db().match_entry("app-v1", "GET", &url).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_skip_waiting_without_waiting_worker() {
        let server = MockServer::start().await;
        let host = host(config(&server.uri())).await;

        let output = output_json(&message_impl(&host, message(r#"{"type":"SKIP_WAITING"}"#)).await.unwrap());
        assert_eq!(output["outcome"], serde_json::json!({"outcome": "skip_waiting", "activated": false}));
    }
}
