//! # toolrelay Agent
//!
//! The orchestration layer: provider discovery and routing, the bounded
//! planning loop, self-healing query execution and their configuration.
//!
//! ## Components
//!
//! - **[`ProviderRegistry`]**: discovers providers, lists their tools and owns
//!   the routing cache
//! - **[`Orchestrator`]**: runs planning rounds against a [`ReasoningEngine`]
//!   and returns a [`ProcessOutcome`] with the full execution trace
//! - **[`execute_with_healing`]**: generate, execute and correct structured
//!   queries; exposed to the planner through [`HealingQueryTool`]
//! - **[`OrchestratorConfigBuilder`]**: builder, TOML and `TOOLRELAY_*`
//!   environment configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolrelay_agent::{OpenAiCompatibleEngine, Orchestrator, OrchestratorConfigBuilder};
//! use toolrelay_core::AccessContext;
//!
//! let config = OrchestratorConfigBuilder::from_env()?.build()?;
//! let engine = Arc::new(OpenAiCompatibleEngine::new(config.engine.clone())?);
//! let orchestrator = Orchestrator::from_config_with_http(&config, engine)?;
//!
//! let caller = AccessContext::new("u-42").with_role("sales");
//! let outcome = orchestrator
//!     .process("Which accounts have open opportunities?", &caller, &[], None)
//!     .await;
//! println!("{}", outcome.response);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod healing;
pub mod openai;
pub mod orchestrator;
pub mod prompt;
pub mod query_tool;
pub mod registry;
pub mod session;

pub use config::{
    ConfigError, EngineConfig, ExecutionMode, OrchestratorConfig, OrchestratorConfigBuilder,
};
pub use engine::{CompletionRequest, CompletionResponse, ReasoningEngine, ToolChoice};
pub use error::{AgentError, AgentResult};
pub use healing::{
    EngineQueryGenerator, HealingFailure, HealingState, HealingSuccess, QueryExecutor,
    QueryGenerator, QueryOutput, QueryRequest, execute_with_healing,
};
pub use openai::OpenAiCompatibleEngine;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, ProcessOutcome};
pub use prompt::{CachedPrompt, DEFAULT_SYSTEM_PROMPT, FilePrompt, PromptSource, StaticPrompt};
pub use query_tool::{DEFAULT_QUERY_TOOL, HealingQueryTool};
pub use registry::{DiscoveryReport, ProviderFailure, ProviderRegistry};
pub use session::{InMemorySessionStore, SessionStore};
