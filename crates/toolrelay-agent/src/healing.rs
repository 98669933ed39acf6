//! Self-healing query execution.
//!
//! A structured query is generated from a natural-language request, executed,
//! and on failure sent back to the generator together with the error so it
//! can produce a corrected query. This differs from transient retry: the
//! payload changes between attempts based on what went wrong.
//!
//! ```text
//! Generate -> Execute -> Done
//!                |
//!                +-> attempt < max -> Correct -> Execute ...
//!                +-> attempt == max -> Fail
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use toolrelay_core::{ChatMessage, CoreError, ToolSchema};
use tracing::{debug, info, warn};

use crate::engine::{CompletionRequest, ReasoningEngine, ToolChoice};
use crate::error::{AgentError, AgentResult};

// ============================================================================
// Core Types
// ============================================================================

/// The natural-language request a query is generated for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    /// Extra generation context, e.g. the caller's visibility hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub limit: usize,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: None,
            limit: 100,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Rows produced by a successful query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub rows: Vec<Value>,
}

impl QueryOutput {
    pub fn new(rows: Vec<Value>) -> Self {
        Self { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(&self, request: &QueryRequest) -> AgentResult<String>;

    /// Produce a replacement for `failed_query`, which failed with `error`.
    async fn correct(
        &self,
        request: &QueryRequest,
        failed_query: &str,
        error: &str,
    ) -> AgentResult<String>;
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execution errors are plain messages; they are fed back to the generator.
    async fn execute(&self, query: &str) -> Result<QueryOutput, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealingState {
    Generate,
    Execute { attempt: usize },
    Correct { attempt: usize },
    Done,
    Fail,
}

impl fmt::Display for HealingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealingState::Generate => write!(f, "generate"),
            HealingState::Execute { attempt } => write!(f, "execute#{attempt}"),
            HealingState::Correct { attempt } => write!(f, "correct#{attempt}"),
            HealingState::Done => write!(f, "done"),
            HealingState::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealingSuccess {
    pub query: String,
    pub output: QueryOutput,
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Query failed after {attempts} attempt(s): {last_error}")]
pub struct HealingFailure {
    /// Executions performed; 0 when the first generation already failed
    pub attempts: usize,
    pub last_query: Option<String>,
    pub last_error: String,
    /// Set when the generator could not produce a correction
    pub correction_error: Option<String>,
}

impl HealingFailure {
    pub fn into_core_error(self) -> CoreError {
        CoreError::SelfHealFailure {
            attempts: self.attempts,
            last_error: self.last_error,
        }
    }
}

// ============================================================================
// Healing Loop
// ============================================================================

/// Generate, execute and correct until success or `max_attempts` executions.
///
/// The generator is asked for at most `max_attempts - 1` corrections. On
/// failure the last execution error is returned; if a correction itself
/// fails, the execution error that prompted it is still the one reported.
pub async fn execute_with_healing(
    request: &QueryRequest,
    generator: &dyn QueryGenerator,
    executor: &dyn QueryExecutor,
    max_attempts: usize,
) -> Result<HealingSuccess, HealingFailure> {
    let max_attempts = max_attempts.max(1);
    let mut state = HealingState::Generate;
    debug!(state = %state, question = %request.question, "Generating query");

    let mut query = match generator.generate(request).await {
        Ok(query) => query,
        Err(e) => {
            warn!(state = %HealingState::Fail, error = %e, "Query generation failed");
            return Err(HealingFailure {
                attempts: 0,
                last_query: None,
                last_error: e.to_string(),
                correction_error: None,
            });
        }
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        state = HealingState::Execute { attempt };
        debug!(state = %state, query = %query, "Executing query");

        let error = match executor.execute(&query).await {
            Ok(output) => {
                info!(
                    state = %HealingState::Done,
                    attempts = attempt,
                    row_count = output.row_count(),
                    "Query succeeded"
                );
                return Ok(HealingSuccess {
                    query,
                    output,
                    attempts: attempt,
                });
            }
            Err(error) => error,
        };

        if attempt >= max_attempts {
            warn!(
                state = %HealingState::Fail,
                attempts = attempt,
                error = %error,
                "Query failed on final attempt"
            );
            return Err(HealingFailure {
                attempts: attempt,
                last_query: Some(query),
                last_error: error,
                correction_error: None,
            });
        }

        state = HealingState::Correct { attempt };
        warn!(state = %state, error = %error, "Query failed, requesting correction");

        match generator.correct(request, &query, &error).await {
            Ok(corrected) => query = corrected,
            Err(e) => {
                warn!(
                    state = %HealingState::Fail,
                    attempts = attempt,
                    error = %e,
                    "Query correction failed"
                );
                return Err(HealingFailure {
                    attempts: attempt,
                    last_query: Some(query),
                    last_error: error,
                    correction_error: Some(e.to_string()),
                });
            }
        }
    }
}

// ============================================================================
// Engine-backed Generator
// ============================================================================

pub const EMIT_QUERY_TOOL: &str = "emit_query";

const DEFAULT_GENERATOR_PROMPT: &str = "You translate questions into a single query for the \
data store described below. Always answer by calling the emit_query tool with the complete \
query text. Use only tables and columns that exist in the schema.";

/// Query generator that asks the reasoning engine for an `emit_query` call.
pub struct EngineQueryGenerator {
    engine: Arc<dyn ReasoningEngine>,
    system_prompt: String,
    schema_context: Option<String>,
}

impl EngineQueryGenerator {
    pub fn new(engine: Arc<dyn ReasoningEngine>) -> Self {
        Self {
            engine,
            system_prompt: DEFAULT_GENERATOR_PROMPT.to_string(),
            schema_context: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Schema or dialect description appended to the system prompt.
    pub fn with_schema_context(mut self, schema: impl Into<String>) -> Self {
        self.schema_context = Some(schema.into());
        self
    }

    fn emit_query_schema() -> ToolSchema {
        ToolSchema {
            name: EMIT_QUERY_TOOL.to_string(),
            description: "Submit the query that answers the request".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Complete query text"}
                },
                "required": ["query"]
            }),
        }
    }

    fn base_messages(&self, request: &QueryRequest) -> Vec<ChatMessage> {
        let mut system = self.system_prompt.clone();
        if let Some(schema) = &self.schema_context {
            system.push_str("\n\n## Schema\n");
            system.push_str(schema);
        }
        if let Some(context) = &request.context {
            system.push_str("\n\n");
            system.push_str(context);
        }

        vec![
            ChatMessage::system(system),
            ChatMessage::user(format!(
                "Generate a query for: {}\n\nLimit results to {} rows.",
                request.question, request.limit
            )),
        ]
    }

    async fn request_query(&self, messages: Vec<ChatMessage>) -> AgentResult<String> {
        let request = CompletionRequest::new(messages)
            .with_tools(vec![Self::emit_query_schema()])
            .with_tool_choice(ToolChoice::Required);

        let response = self.engine.complete(request).await?;
        let call = response.tool_calls.into_iter().next().ok_or_else(|| {
            AgentError::InvalidResponse("engine did not return a query tool call".to_string())
        })?;

        let arguments: Value = serde_json::from_str(&call.arguments).map_err(|e| {
            AgentError::InvalidResponse(format!("query tool arguments are not JSON: {}", e))
        })?;

        match arguments.get("query").and_then(Value::as_str).map(str::trim) {
            Some(query) if !query.is_empty() => Ok(query.to_string()),
            _ => Err(AgentError::InvalidResponse(
                "query tool call has no query".to_string(),
            )),
        }
    }
}

#[async_trait]
impl QueryGenerator for EngineQueryGenerator {
    async fn generate(&self, request: &QueryRequest) -> AgentResult<String> {
        self.request_query(self.base_messages(request)).await
    }

    async fn correct(
        &self,
        request: &QueryRequest,
        failed_query: &str,
        error: &str,
    ) -> AgentResult<String> {
        let mut messages = self.base_messages(request);
        messages.push(ChatMessage::user(format!(
            "The previous query failed and must be corrected.\n\n\
             Original request: {}\n\nFailed query:\n{}\n\nError:\n{}\n\n\
             Return a corrected query that fixes this error.",
            request.question, failed_query, error
        )));
        self.request_query(messages).await
    }
}
