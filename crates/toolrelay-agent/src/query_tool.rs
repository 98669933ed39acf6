//! In-process provider exposing a natural-language query tool.
//!
//! The tool turns a question into a structured query with a
//! [`QueryGenerator`], runs it through a [`QueryExecutor`] and heals failed
//! queries. Register it with `DefaultConnector::with_in_process` under a
//! `ProviderDescriptor::in_process` id.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use toolrelay_core::ACCESS_CONTEXT_ARGUMENT;
use toolrelay_mcp::{CallToolResult, McpError, McpResult, McpTool, ServerInfo, ToolProviderClient};
use tracing::info;

use crate::config::{DEFAULT_MAX_HEAL_ATTEMPTS, OrchestratorConfig};
use crate::healing::{QueryExecutor, QueryGenerator, QueryRequest, execute_with_healing};

pub const DEFAULT_QUERY_TOOL: &str = "query_data";
pub const DEFAULT_QUERY_LIMIT: usize = 100;

pub struct HealingQueryTool {
    tool_name: String,
    description: String,
    generator: Arc<dyn QueryGenerator>,
    executor: Arc<dyn QueryExecutor>,
    max_attempts: usize,
    default_limit: usize,
}

impl HealingQueryTool {
    pub fn new(generator: Arc<dyn QueryGenerator>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            tool_name: DEFAULT_QUERY_TOOL.to_string(),
            description: "Answer a data question by generating and running a query".to_string(),
            generator,
            executor,
            max_attempts: DEFAULT_MAX_HEAL_ATTEMPTS,
            default_limit: DEFAULT_QUERY_LIMIT,
        }
    }

    /// Tool with the attempt budget taken from `max_heal_attempts`.
    pub fn from_config(
        config: &OrchestratorConfig,
        generator: Arc<dyn QueryGenerator>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self::new(generator, executor).with_max_attempts(config.max_heal_attempts)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    fn descriptor(&self) -> McpTool {
        McpTool::new(&self.tool_name)
            .with_description(&self.description)
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "Natural-language description of the data needed"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of rows to return"
                    }
                },
                "required": ["question"]
            }))
    }

    fn build_request(&self, arguments: &Value) -> McpResult<QueryRequest> {
        let question = arguments
            .get("question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                McpError::ToolExecutionFailed("missing required argument 'question'".to_string())
            })?;

        let limit = arguments
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .filter(|l| *l > 0)
            .unwrap_or(self.default_limit);

        let mut request = QueryRequest::new(question).with_limit(limit);

        let email = arguments
            .get(ACCESS_CONTEXT_ARGUMENT)
            .and_then(|ctx| ctx.get("email"))
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty());
        if let Some(email) = email {
            request = request.with_context(format!(
                "## Access Context\nUser: {email}\nOnly return rows this user may see, \
                 e.g. filter on owner_email = '{email}' or assigned_to = '{email}'."
            ));
        }

        Ok(request)
    }
}

#[async_trait]
impl ToolProviderClient for HealingQueryTool {
    async fn initialize(&self) -> McpResult<ServerInfo> {
        Ok(ServerInfo {
            name: "healing-query".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        Ok(vec![self.descriptor()])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        if name != self.tool_name {
            return Err(McpError::ToolNotFound(name.to_string()));
        }

        let request = match self.build_request(&arguments) {
            Ok(request) => request,
            Err(e) => return Ok(CallToolResult::error(e.to_string())),
        };

        let started = Instant::now();
        let outcome = execute_with_healing(
            &request,
            self.generator.as_ref(),
            self.executor.as_ref(),
            self.max_attempts,
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let payload = match outcome {
            Ok(success) => {
                let row_count = success.output.row_count();
                info!(tool = %self.tool_name, row_count, attempts = success.attempts, duration_ms, "Query tool complete");
                let mut rows = success.output.rows;
                rows.truncate(request.limit);
                json!({
                    "success": true,
                    "query": success.query,
                    "row_count": row_count,
                    "data": rows,
                    "attempts": success.attempts,
                })
            }
            Err(failure) => {
                info!(tool = %self.tool_name, attempts = failure.attempts, duration_ms, "Query tool failed");
                json!({
                    "success": false,
                    "error": failure.last_error,
                    "query": failure.last_query.unwrap_or(request.question),
                    "attempts": failure.attempts,
                })
            }
        };

        Ok(CallToolResult::structured(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentResult;
    use crate::healing::QueryOutput;
    use std::sync::Mutex;
    use toolrelay_mcp::normalize_call_result;

    #[derive(Default)]
    struct EchoGenerator {
        contexts: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl QueryGenerator for EchoGenerator {
        async fn generate(&self, request: &QueryRequest) -> AgentResult<String> {
            self.contexts.lock().unwrap().push(request.context.clone());
            Ok(format!("SELECT * FROM t LIMIT {}", request.limit))
        }

        async fn correct(
            &self,
            _request: &QueryRequest,
            failed_query: &str,
            _error: &str,
        ) -> AgentResult<String> {
            Ok(format!("{failed_query} -- fixed"))
        }
    }

    struct RowsExecutor {
        rows: usize,
        fail: bool,
    }

    #[async_trait]
    impl QueryExecutor for RowsExecutor {
        async fn execute(&self, _query: &str) -> Result<QueryOutput, String> {
            if self.fail {
                return Err("table t does not exist".to_string());
            }
            Ok(QueryOutput::new(
                (0..self.rows).map(|i| json!({"id": i})).collect(),
            ))
        }
    }

    fn tool(generator: Arc<EchoGenerator>, rows: usize, fail: bool) -> HealingQueryTool {
        HealingQueryTool::new(generator, Arc::new(RowsExecutor { rows, fail }))
    }

    #[tokio::test]
    async fn test_lists_single_tool() {
        let tool = tool(Arc::new(EchoGenerator::default()), 0, false);
        let tools = tool.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "query_data");
        assert_eq!(tools[0].input_schema["required"][0], "question");
    }

    #[tokio::test]
    async fn test_success_payload_truncated_to_limit() {
        let tool = tool(Arc::new(EchoGenerator::default()), 5, false);
        let result = tool
            .call_tool("query_data", json!({"question": "all rows", "limit": 2}))
            .await
            .unwrap();

        let normalized = normalize_call_result(result);
        assert!(normalized.success);
        assert_eq!(normalized.data.unwrap().as_array().unwrap().len(), 2);
        assert_eq!(normalized.metadata["row_count"], 5);
        assert_eq!(normalized.metadata["attempts"], 1);
        assert_eq!(normalized.metadata["query"], "SELECT * FROM t LIMIT 2");
    }

    #[tokio::test]
    async fn test_failure_payload_carries_last_error() {
        let tool = tool(Arc::new(EchoGenerator::default()), 0, true).with_max_attempts(2);
        let result = tool
            .call_tool("query_data", json!({"question": "anything"}))
            .await
            .unwrap();

        let normalized = normalize_call_result(result);
        assert!(!normalized.success);
        assert_eq!(normalized.error.as_deref(), Some("table t does not exist"));
        assert_eq!(normalized.metadata["attempts"], 2);
        assert_eq!(normalized.metadata["query"], "SELECT * FROM t LIMIT 100 -- fixed");
    }

    #[tokio::test]
    async fn test_attempt_budget_from_config() {
        let config = OrchestratorConfig::builder()
            .max_heal_attempts(4)
            .build()
            .unwrap();
        let tool = HealingQueryTool::from_config(
            &config,
            Arc::new(EchoGenerator::default()),
            Arc::new(RowsExecutor { rows: 0, fail: true }),
        );
        assert_eq!(tool.max_attempts(), 4);

        let result = tool
            .call_tool("query_data", json!({"question": "anything"}))
            .await
            .unwrap();
        let normalized = normalize_call_result(result);
        assert!(!normalized.success);
        assert_eq!(normalized.metadata["attempts"], 4);
    }

    #[tokio::test]
    async fn test_access_context_email_becomes_hint() {
        let generator = Arc::new(EchoGenerator::default());
        let tool = tool(generator.clone(), 1, false);
        tool.call_tool(
            "query_data",
            json!({"question": "my accounts", "rbac_context": {"email": "amy@example.com"}}),
        )
        .await
        .unwrap();

        let contexts = generator.contexts.lock().unwrap();
        assert!(contexts[0].as_deref().unwrap().contains("amy@example.com"));
    }

    #[tokio::test]
    async fn test_missing_question_is_error_result() {
        let tool = tool(Arc::new(EchoGenerator::default()), 1, false);
        let result = tool.call_tool("query_data", json!({})).await.unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_unknown_tool_name() {
        let tool = tool(Arc::new(EchoGenerator::default()), 1, false);
        let err = tool.call_tool("other", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(_)));
    }
}
