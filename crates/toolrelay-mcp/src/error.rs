//! MCP error types

use thiserror::Error;
use toolrelay_core::CoreError;

/// MCP operation result type
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur while talking to a tool provider
#[derive(Debug, Error)]
pub enum McpError {
    /// Tool execution failed on the provider side
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// Tool not found
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// MCP protocol error (malformed JSON-RPC, unexpected shape)
    #[error("MCP protocol error: {0}")]
    ProtocolError(String),

    /// Transport error (HTTP status, broken body)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// JSON-RPC error object returned by the server
    #[error("Server error {code}: {message}")]
    ServerError { code: i64, message: String },

    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Request timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Endpoint URL could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl McpError {
    /// Check if this error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            McpError::ConnectionError(_) | McpError::Timeout(_)
        )
    }

    /// Whether the cached connection handle should be dropped after this error.
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            McpError::ConnectionError(_) | McpError::Timeout(_) | McpError::TransportError(_)
        )
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            McpError::ToolExecutionFailed(_) => "TOOL_EXECUTION_FAILED",
            McpError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            McpError::SerializationError(_) => "SERIALIZATION_ERROR",
            McpError::ProtocolError(_) => "PROTOCOL_ERROR",
            McpError::TransportError(_) => "TRANSPORT_ERROR",
            McpError::ServerError { .. } => "SERVER_ERROR",
            McpError::ConnectionError(_) => "CONNECTION_ERROR",
            McpError::Timeout(_) => "TIMEOUT",
            McpError::InvalidEndpoint(_) => "INVALID_ENDPOINT",
        }
    }

    /// Map into the engine-wide taxonomy for a call against `provider_id`.
    pub fn into_transport_failure(self, provider_id: &str) -> CoreError {
        CoreError::TransportFailure {
            provider_id: provider_id.to_string(),
            message: self.to_string(),
        }
    }

    /// Map into the engine-wide taxonomy for a discovery pass.
    pub fn into_discovery_failure(self, provider_id: &str) -> CoreError {
        CoreError::DiscoveryFailure {
            provider_id: provider_id.to_string(),
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            McpError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            McpError::ConnectionError(err.to_string())
        } else {
            McpError::TransportError(err.to_string())
        }
    }
}
