//! # Error Types
//!
//! The failure taxonomy of the orchestration engine. Only a subset of these
//! ever aborts a `process` call; the rest are folded into execution records
//! and the loop keeps going.

use thiserror::Error;

/// Failure kinds shared by every toolrelay crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A provider could not be reached while enumerating providers or tools.
    #[error("Discovery failed for provider '{provider_id}': {message}")]
    DiscoveryFailure {
        provider_id: String,
        message: String,
    },

    /// A tool name has no registered or visible provider.
    #[error("Tool not found: {0}")]
    RoutingFailure(String),

    /// A provider call errored or timed out.
    #[error("Transport failure on provider '{provider_id}': {message}")]
    TransportFailure {
        provider_id: String,
        message: String,
    },

    /// The reasoning engine errored or returned an unusable response.
    #[error("Reasoning engine failure: {0}")]
    ReasoningEngineFailure(String),

    /// The round budget ran out while the engine still requested tools.
    #[error("Max planning rounds reached")]
    RoundLimitExceeded { max_rounds: usize },

    /// Every corrected query failed.
    #[error("Query failed after {attempts} attempt(s): {last_error}")]
    SelfHealFailure { attempts: usize, last_error: String },

    /// Two providers declared the same tool under `CollisionPolicy::Reject`.
    #[error("Tool '{tool}' is declared by both '{first}' and '{second}'")]
    ToolNameCollision {
        tool: String,
        first: String,
        second: String,
    },

    /// Access policy document could not be parsed.
    #[error("Invalid access policy: {0}")]
    InvalidPolicy(String),
}

impl CoreError {
    /// Whether this failure aborts the whole `process` call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::ReasoningEngineFailure(_)
                | CoreError::RoundLimitExceeded { .. }
                | CoreError::ToolNameCollision { .. }
                | CoreError::InvalidPolicy(_)
        )
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::DiscoveryFailure { .. } => "DISCOVERY_FAILURE",
            CoreError::RoutingFailure(_) => "ROUTING_FAILURE",
            CoreError::TransportFailure { .. } => "TRANSPORT_FAILURE",
            CoreError::ReasoningEngineFailure(_) => "REASONING_ENGINE_FAILURE",
            CoreError::RoundLimitExceeded { .. } => "ROUND_LIMIT_EXCEEDED",
            CoreError::SelfHealFailure { .. } => "SELF_HEAL_FAILURE",
            CoreError::ToolNameCollision { .. } => "TOOL_NAME_COLLISION",
            CoreError::InvalidPolicy(_) => "INVALID_POLICY",
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
