//! Errors raised by the MCP surface itself, as opposed to the worker.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Invalid tool parameters (e.g., a malformed header).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A request the worker did not intercept could not reach the network.
    #[error("PASS_THROUGH_FAILED: {0}")]
    PassThroughFailed(String),
}

impl From<HostError> for McpError {
    fn from(err: HostError) -> Self {
        let (code, message) = match &err {
            HostError::InvalidInput(msg) => (-32602, msg.clone()),
            HostError::PassThroughFailed(msg) => (-32006, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
