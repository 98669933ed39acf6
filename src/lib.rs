//! # toolrelay
//!
//! A tool-call orchestration engine. A reasoning engine plans in bounded
//! rounds; each requested tool call is routed to the MCP provider that
//! declares it, executed with the caller's access context attached, and its
//! result normalized before the next round.
//!
//! ## Core Components
//!
//! - **[`Orchestrator`]**: the planning loop, returning a [`ProcessOutcome`]
//! - **[`ProviderRegistry`]**: discovery, tool listing and the routing cache
//! - **[`AccessPolicy`]**: which roles see which tools
//! - **[`execute_with_healing`]**: generate, execute and correct queries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolrelay::{AccessContext, OpenAiCompatibleEngine, Orchestrator, OrchestratorConfigBuilder};
//!
//! let config = OrchestratorConfigBuilder::from_env()?.build()?;
//! let engine = Arc::new(OpenAiCompatibleEngine::new(config.engine.clone())?);
//! let orchestrator = Orchestrator::from_config_with_http(&config, engine)?;
//!
//! let outcome = orchestrator
//!     .process("Show my open opportunities", &AccessContext::new("u-1"), &[], None)
//!     .await;
//! ```

// ============================================================================
// Module aliases for namespaced access
// ============================================================================

pub use toolrelay_agent as agent;
pub use toolrelay_core as core;
pub use toolrelay_mcp as mcp;

// ============================================================================
// Flat re-exports
// ============================================================================

pub use toolrelay_core::{
    AccessContext, AccessPolicy, AccessScope, ChatMessage, CollisionPolicy, CoreError,
    ExecutionRecord, NormalizedResult, ProviderDescriptor, RetryPolicy, RoleGrant, RoutingTable,
    ToolCallRequest, ToolDescriptor, ToolRestriction,
};

pub use toolrelay_mcp::{
    CallToolResult, DefaultConnector, HttpMcpClient, McpError, McpTool, ProviderConnector,
    ProviderTransport, ToolProviderClient,
};

pub use toolrelay_agent::{
    AgentError, AgentResult, CompletionRequest, CompletionResponse, EngineConfig, ExecutionMode,
    HealingQueryTool, OpenAiCompatibleEngine, Orchestrator, OrchestratorConfig,
    OrchestratorConfigBuilder, ProcessOutcome, ProviderRegistry, ReasoningEngine,
    execute_with_healing,
};
