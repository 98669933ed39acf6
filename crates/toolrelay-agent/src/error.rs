//! Error types for the orchestration layer.

use thiserror::Error;
use toolrelay_core::CoreError;
use toolrelay_mcp::McpError;

use crate::config::ConfigError;

/// Errors that can occur while planning or executing.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The reasoning engine could not be reached or answered with an error.
    #[error("Reasoning engine error: {0}")]
    EngineError(String),

    /// The reasoning engine is temporarily unavailable (rate limit, 5xx).
    #[error("Reasoning engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The reasoning engine answered with something we cannot use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// System prompt could not be loaded.
    #[error("Prompt unavailable: {0}")]
    PromptUnavailable(String),

    /// Session store failure.
    #[error("Session store error: {0}")]
    SessionError(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Engine-wide failure kinds.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Provider transport failure.
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AgentError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::EngineUnavailable(_) | AgentError::Timeout(_) => true,
            AgentError::Mcp(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            AgentError::EngineError(_) => "ENGINE_ERROR",
            AgentError::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            AgentError::InvalidResponse(_) => "INVALID_RESPONSE",
            AgentError::Timeout(_) => "TIMEOUT",
            AgentError::PromptUnavailable(_) => "PROMPT_UNAVAILABLE",
            AgentError::SessionError(_) => "SESSION_ERROR",
            AgentError::SerializationError(_) => "SERIALIZATION_ERROR",
            AgentError::Core(e) => e.error_code(),
            AgentError::Mcp(_) => "MCP_ERROR",
            AgentError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::PromptUnavailable(format!("IO error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::EngineError("401 Unauthorized".to_string());
        assert_eq!(err.to_string(), "Reasoning engine error: 401 Unauthorized");

        let err: AgentError = CoreError::RoundLimitExceeded { max_rounds: 2 }.into();
        assert_eq!(err.to_string(), "Max planning rounds reached");
    }

    #[test]
    fn test_is_retryable() {
        assert!(AgentError::EngineUnavailable("429".to_string()).is_retryable());
        assert!(AgentError::Timeout("30s".to_string()).is_retryable());
        assert!(AgentError::Mcp(McpError::ConnectionError("refused".into())).is_retryable());
        assert!(!AgentError::InvalidResponse("no choices".to_string()).is_retryable());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            AgentError::Core(CoreError::RoutingFailure("x".into())).error_code(),
            "ROUTING_FAILURE"
        );
        assert_eq!(
            AgentError::PromptUnavailable("empty".into()).error_code(),
            "PROMPT_UNAVAILABLE"
        );
    }
}
