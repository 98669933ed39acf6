//! # Orchestrator
//!
//! The bounded planning loop. Each round the reasoning engine sees the
//! conversation so far plus the tools visible to the caller, and either
//! answers or asks for tool calls. Requested calls are routed through the
//! registry, executed, and their results appended to the conversation for
//! the next round.
//!
//! ```text
//! Init -> Planning -> Done
//!            |
//!            +-> Executing -> Planning ...
//!            +-> (round budget spent) -> RoundLimitFailure
//! ```
//!
//! `process` never returns an error: every failure is folded into a
//! [`ProcessOutcome`] carrying an explanation and the partial trace.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolrelay_core::{
    ACCESS_CONTEXT_ARGUMENT, AccessContext, AccessPolicy, ChatMessage, CoreError,
    ExecutionRecord, NormalizedResult, Route, ToolCallRequest, ToolDescriptor, ToolSchema,
};
use toolrelay_mcp::{DefaultConnector, ProviderConnector, ProviderTransport};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::{ConfigError, DEFAULT_MAX_ROUNDS, ExecutionMode, OrchestratorConfig};
use crate::engine::{CompletionRequest, CompletionResponse, ReasoningEngine, ToolChoice};
use crate::error::{AgentError, AgentResult};
use crate::prompt::{CachedPrompt, FilePrompt, PromptSource, StaticPrompt};
use crate::registry::{DiscoveryReport, ProviderRegistry};
use crate::session::{InMemorySessionStore, SessionStore};

pub const NO_PROVIDERS_ERROR: &str = "No tool providers available";
pub const NO_TOOLS_ERROR: &str = "No tools available";
pub const TOOL_NOT_FOUND_ERROR: &str = "Tool not found";

const NO_PROVIDERS_RESPONSE: &str = "I don't have access to any tools to answer your question.";
const NO_TOOLS_RESPONSE: &str = "I don't have the necessary tools to answer your question.";
const ROUND_LIMIT_RESPONSE: &str =
    "I wasn't able to complete your request within the allowed planning rounds.";
const FAILURE_RESPONSE: &str = "An error occurred while processing your request.";

// ============================================================================
// Outcome
// ============================================================================

/// Structured result of one `process` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub success: bool,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Planning rounds used, never more than the round budget
    pub rounds: usize,
    pub execution_records: Vec<ExecutionRecord>,
    /// Distinct provider ids touched by the trace, in first-use order
    pub providers_used: Vec<String>,
}

impl ProcessOutcome {
    fn completed(response: String, rounds: usize, records: Vec<ExecutionRecord>) -> Self {
        Self {
            success: true,
            response,
            error: None,
            rounds,
            providers_used: providers_used(&records),
            execution_records: records,
        }
    }

    fn failed(
        error: impl Into<String>,
        response: &str,
        rounds: usize,
        records: Vec<ExecutionRecord>,
    ) -> Self {
        Self {
            success: false,
            response: response.to_string(),
            error: Some(error.into()),
            rounds,
            providers_used: providers_used(&records),
            execution_records: records,
        }
    }
}

fn providers_used(records: &[ExecutionRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|r| r.provider_id.as_deref())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum LoopState {
    Init,
    Planning { round: usize },
    Executing { round: usize, response: CompletionResponse },
    Done { round: usize, response: String },
    RoundLimitFailure,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Init => write!(f, "init"),
            LoopState::Planning { round } => write!(f, "planning#{round}"),
            LoopState::Executing { round, .. } => write!(f, "executing#{round}"),
            LoopState::Done { .. } => write!(f, "done"),
            LoopState::RoundLimitFailure => write!(f, "round_limit_failure"),
        }
    }
}

/// Per-call working set: conversation, visible tools and the trace.
struct PlanningRun<'a> {
    access: &'a AccessContext,
    messages: Vec<ChatMessage>,
    schemas: Vec<ToolSchema>,
    /// Visible tool name to the provider it was approved on
    visible: HashMap<String, String>,
    records: Vec<ExecutionRecord>,
    next_sequence: u64,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    engine: Arc<dyn ReasoningEngine>,
    prompt: CachedPrompt,
    policy: AccessPolicy,
    execution_mode: ExecutionMode,
    max_rounds: usize,
    sessions: Arc<dyn SessionStore>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Wire an orchestrator from validated configuration.
    ///
    /// The system prompt comes from `system_prompt`, then
    /// `system_prompt_path`, then the built-in default. Without an access
    /// policy file every tool is visible, subject to per-tool role lists.
    pub fn from_config(
        config: &OrchestratorConfig,
        engine: Arc<dyn ReasoningEngine>,
        connector: Arc<dyn ProviderConnector>,
    ) -> AgentResult<Self> {
        let transport = Arc::new(ProviderTransport::new(connector));
        let registry = ProviderRegistry::new(config.providers.clone(), transport)
            .with_collision_policy(config.collision_policy);

        let prompt: Arc<dyn PromptSource> = match (&config.system_prompt, &config.system_prompt_path)
        {
            (Some(text), _) => Arc::new(StaticPrompt::new(text.clone())),
            (None, Some(path)) => Arc::new(FilePrompt::new(path.clone())),
            (None, None) => Arc::new(StaticPrompt::default()),
        };

        let policy = match &config.access_policy_path {
            Some(path) => AccessPolicy::from_toml_file(path)?,
            None => AccessPolicy::allow_all(),
        };

        Self::builder()
            .registry(Arc::new(registry))
            .engine(engine)
            .prompt_source(prompt)
            .access_policy(policy)
            .execution_mode(config.execution_mode)
            .max_rounds(config.max_rounds)
            .build()
    }

    /// Like [`Orchestrator::from_config`] with the HTTP connector.
    pub fn from_config_with_http(
        config: &OrchestratorConfig,
        engine: Arc<dyn ReasoningEngine>,
    ) -> AgentResult<Self> {
        let connector = DefaultConnector::new()
            .with_timeout(Duration::from_secs(config.provider_timeout_secs));
        Self::from_config(config, engine, Arc::new(connector))
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn access_policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Run a discovery pass and replace the routing cache.
    pub async fn refresh(&self) -> AgentResult<DiscoveryReport> {
        self.registry.refresh().await
    }

    /// Tools the caller may see, loading the registry if needed.
    pub async fn visible_tools(&self, access: &AccessContext) -> AgentResult<Vec<ToolDescriptor>> {
        self.registry.ensure_loaded().await?;
        let tools = self.registry.tools().await;
        Ok(self.policy.visible_tools(&access.roles, &tools))
    }

    /// Drop every cache this orchestrator owns: routing table, provider
    /// handles and the system prompt.
    pub async fn invalidate_caches(&self) {
        self.registry.invalidate().await;
        self.prompt.invalidate().await;
        info!("Orchestrator caches invalidated");
    }

    /// Answer `query` for the caller, planning for at most `max_rounds`
    /// rounds (the configured budget when `None`).
    pub async fn process(
        &self,
        query: &str,
        access: &AccessContext,
        history: &[ChatMessage],
        max_rounds: Option<usize>,
    ) -> ProcessOutcome {
        let max_rounds = max_rounds.unwrap_or(self.max_rounds);
        let started = Instant::now();
        info!(
            user_id = %access.user_id,
            query_chars = query.len(),
            max_rounds,
            "Processing request"
        );

        let outcome = self.run(query, access, history, max_rounds).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        if outcome.success {
            info!(
                rounds = outcome.rounds,
                tool_calls = outcome.execution_records.len(),
                duration_ms,
                "Request complete"
            );
        } else {
            warn!(
                rounds = outcome.rounds,
                tool_calls = outcome.execution_records.len(),
                error = outcome.error.as_deref().unwrap_or_default(),
                duration_ms,
                "Request failed"
            );
        }
        outcome
    }

    /// [`Orchestrator::process`] with history read from and written back to
    /// the session store. Only the user query and the final response are
    /// stored, not intermediate tool traffic.
    pub async fn process_in_session(
        &self,
        session_id: &str,
        query: &str,
        access: &AccessContext,
        max_rounds: Option<usize>,
    ) -> AgentResult<ProcessOutcome> {
        let history = self.sessions.history(session_id).await?;
        let outcome = self.process(query, access, &history, max_rounds).await;

        self.sessions
            .append(
                session_id,
                vec![
                    ChatMessage::user(query),
                    ChatMessage::assistant(outcome.response.clone()),
                ],
            )
            .await?;
        debug!(session_id = %session_id, "Session history updated");
        Ok(outcome)
    }

    async fn run(
        &self,
        query: &str,
        access: &AccessContext,
        history: &[ChatMessage],
        max_rounds: usize,
    ) -> ProcessOutcome {
        debug!(state = %LoopState::Init, "Planning loop starting");
        let mut run = match self.prepare(query, access, history).await {
            Ok(run) => run,
            Err(outcome) => return outcome,
        };

        let mut state = LoopState::Planning { round: 1 };
        loop {
            state = match state {
                LoopState::Planning { round } if round > max_rounds => LoopState::RoundLimitFailure,
                LoopState::Planning { round } => {
                    let span = info_span!("planning_round", round);
                    let planned = self.plan(&run).instrument(span).await;
                    match planned {
                        Ok(response) if response.has_tool_calls() => {
                            LoopState::Executing { round, response }
                        }
                        Ok(response) => match response.text_content() {
                            Some(text) => LoopState::Done {
                                round,
                                response: text.to_string(),
                            },
                            None => {
                                let error = CoreError::ReasoningEngineFailure(
                                    "engine returned neither content nor tool calls".to_string(),
                                );
                                return ProcessOutcome::failed(
                                    error.to_string(),
                                    FAILURE_RESPONSE,
                                    round,
                                    run.records,
                                );
                            }
                        },
                        Err(e) => {
                            let error = CoreError::ReasoningEngineFailure(e.to_string());
                            return ProcessOutcome::failed(
                                error.to_string(),
                                FAILURE_RESPONSE,
                                round,
                                run.records,
                            );
                        }
                    }
                }
                LoopState::Executing { round, response } => {
                    let span = info_span!("planning_round", round);
                    self.execute_round(&mut run, response).instrument(span).await;
                    LoopState::Planning { round: round + 1 }
                }
                LoopState::Done { round, response } => {
                    debug!(state = "done", rounds = round, "Planning loop finished");
                    return ProcessOutcome::completed(response, round, run.records);
                }
                LoopState::RoundLimitFailure => {
                    let error = CoreError::RoundLimitExceeded { max_rounds };
                    warn!(max_rounds, error_code = error.error_code(), "Round budget spent");
                    return ProcessOutcome::failed(
                        error.to_string(),
                        ROUND_LIMIT_RESPONSE,
                        max_rounds,
                        run.records,
                    );
                }
                LoopState::Init => LoopState::Planning { round: 1 },
            };
        }
    }

    /// Discovery, tool filtering and prompt loading. Early exits come back
    /// as finished outcomes.
    async fn prepare<'a>(
        &self,
        query: &str,
        access: &'a AccessContext,
        history: &[ChatMessage],
    ) -> Result<PlanningRun<'a>, ProcessOutcome> {
        if let Err(e) = self.registry.ensure_loaded().await {
            return Err(ProcessOutcome::failed(e.to_string(), FAILURE_RESPONSE, 0, Vec::new()));
        }

        if self.registry.providers().await.is_empty() {
            return Err(ProcessOutcome::failed(
                NO_PROVIDERS_ERROR,
                NO_PROVIDERS_RESPONSE,
                0,
                Vec::new(),
            ));
        }

        let tools = self
            .policy
            .visible_tools(&access.roles, &self.registry.tools().await);
        if tools.is_empty() {
            return Err(ProcessOutcome::failed(
                NO_TOOLS_ERROR,
                NO_TOOLS_RESPONSE,
                0,
                Vec::new(),
            ));
        }
        debug!(visible_tools = tools.len(), "Tool set filtered for caller");

        let system_prompt = match self.prompt.get().await {
            Ok(prompt) => prompt,
            Err(e) => {
                return Err(ProcessOutcome::failed(
                    e.to_string(),
                    FAILURE_RESPONSE,
                    0,
                    Vec::new(),
                ));
            }
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(&*system_prompt));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(query));

        Ok(PlanningRun {
            access,
            messages,
            schemas: tools.iter().map(ToolDescriptor::schema).collect(),
            visible: tools.into_iter().map(|t| (t.name, t.provider_id)).collect(),
            records: Vec::new(),
            next_sequence: 1,
        })
    }

    async fn plan(&self, run: &PlanningRun<'_>) -> AgentResult<CompletionResponse> {
        let request = CompletionRequest::new(run.messages.clone())
            .with_tools(run.schemas.clone())
            .with_tool_choice(ToolChoice::Auto);

        let response = self.engine.complete(request).await?;
        debug!(
            tool_calls = response.tool_calls.len(),
            has_content = response.text_content().is_some(),
            "Engine answered"
        );
        Ok(response)
    }

    async fn execute_round(&self, run: &mut PlanningRun<'_>, response: CompletionResponse) {
        let calls = response.tool_calls;
        info!(
            tool_calls = calls.len(),
            tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Executing tool calls"
        );
        let started = Instant::now();

        let numbered: Vec<(u64, &ToolCallRequest)> = calls
            .iter()
            .enumerate()
            .map(|(i, call)| (run.next_sequence + i as u64, call))
            .collect();
        run.next_sequence += calls.len() as u64;

        let access = run.access;
        let visible = &run.visible;
        let records: Vec<ExecutionRecord> = match self.execution_mode {
            ExecutionMode::Sequential => {
                let mut records = Vec::with_capacity(numbered.len());
                for (sequence, call) in numbered {
                    records.push(self.execute_call(sequence, call, access, visible).await);
                }
                records
            }
            ExecutionMode::Concurrent { max_in_flight } => {
                stream::iter(numbered)
                    .map(|(sequence, call)| self.execute_call(sequence, call, access, visible))
                    .buffered(max_in_flight.max(1))
                    .collect()
                    .await
            }
        };

        info!(
            tool_calls = records.len(),
            failed = records.iter().filter(|r| !r.result.success).count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Tool calls executed"
        );

        run.messages
            .push(ChatMessage::assistant_tool_calls(response.content, calls));
        for record in &records {
            run.messages.push(ChatMessage::tool(
                record.tool_call_id.clone(),
                record.result.to_message_content(),
            ));
        }
        run.records.extend(records);
    }

    async fn execute_call(
        &self,
        sequence: u64,
        call: &ToolCallRequest,
        access: &AccessContext,
        visible: &HashMap<String, String>,
    ) -> ExecutionRecord {
        let record = |provider_id: Option<String>, arguments: Value, result: NormalizedResult| {
            ExecutionRecord {
                sequence,
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                provider_id,
                arguments,
                result,
            }
        };

        let mut arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(message) => {
                warn!(tool = %call.name, error = %message, "Unparseable tool arguments");
                return record(
                    None,
                    Value::String(call.arguments.clone()),
                    NormalizedResult::failure(format!("Invalid tool arguments: {}", message)),
                );
            }
        };
        arguments.remove(ACCESS_CONTEXT_ARGUMENT);
        let recorded = Value::Object(arguments.clone());

        let route = match visible.get(&call.name) {
            Some(approved) => match self.registry.resolve(&call.name).await {
                Route::Provider(p) if &p.id == approved => Route::Provider(p),
                _ => Route::Unresolved,
            },
            None => Route::Unresolved,
        };
        let Route::Provider(provider) = route else {
            let error = CoreError::RoutingFailure(call.name.clone());
            warn!(tool = %call.name, error_code = error.error_code(), "No provider for tool");
            return record(None, recorded, NormalizedResult::failure(TOOL_NOT_FOUND_ERROR));
        };

        arguments.insert(
            ACCESS_CONTEXT_ARGUMENT.to_string(),
            access.to_argument_value(),
        );
        debug!(tool = %call.name, provider_id = %provider.id, sequence, "Routing tool call");

        let result = self
            .registry
            .transport()
            .invoke(&provider, &call.name, Value::Object(arguments))
            .await;
        record(Some(provider.id), recorded, result)
    }
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct OrchestratorBuilder {
    registry: Option<Arc<ProviderRegistry>>,
    engine: Option<Arc<dyn ReasoningEngine>>,
    prompt: Option<Arc<dyn PromptSource>>,
    policy: AccessPolicy,
    execution_mode: ExecutionMode,
    max_rounds: usize,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            engine: None,
            prompt: None,
            policy: AccessPolicy::allow_all(),
            execution_mode: ExecutionMode::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            sessions: None,
        }
    }
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn ReasoningEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn prompt_source(mut self, source: Arc<dyn PromptSource>) -> Self {
        self.prompt = Some(source);
        self
    }

    #[must_use]
    pub fn system_prompt(self, prompt: impl Into<String>) -> Self {
        self.prompt_source(Arc::new(StaticPrompt::new(prompt)))
    }

    #[must_use]
    pub fn access_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    #[must_use]
    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    #[must_use]
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn build(self) -> AgentResult<Orchestrator> {
        let registry = self.registry.ok_or_else(|| {
            AgentError::Config(ConfigError::ValidationError(
                "orchestrator needs a provider registry".to_string(),
            ))
        })?;
        let engine = self.engine.ok_or_else(|| {
            AgentError::Config(ConfigError::ValidationError(
                "orchestrator needs a reasoning engine".to_string(),
            ))
        })?;

        Ok(Orchestrator {
            registry,
            engine,
            prompt: self
                .prompt
                .map(CachedPrompt::new)
                .unwrap_or_default(),
            policy: self.policy,
            execution_mode: self.execution_mode,
            max_rounds: self.max_rounds,
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(InMemorySessionStore::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use toolrelay_core::{ProviderDescriptor, RetryPolicy, RoleGrant, UnlistedAccess};
    use toolrelay_mcp::{CallToolResult, McpError, McpResult, McpTool, ServerInfo, ToolProviderClient};

    // ------------------------------------------------------------------------
    // Local stubs
    // ------------------------------------------------------------------------

    struct ScriptedEngine {
        script: Mutex<VecDeque<AgentResult<CompletionResponse>>>,
        fallback: CompletionResponse,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedEngine {
        fn new(script: Vec<AgentResult<CompletionResponse>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: CompletionResponse::text("done"),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn always(response: CompletionResponse) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: response,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        async fn complete(&self, request: CompletionRequest) -> AgentResult<CompletionResponse> {
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    struct RecordingProvider {
        tools: Vec<&'static str>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl ToolProviderClient for RecordingProvider {
        async fn initialize(&self) -> McpResult<ServerInfo> {
            Ok(ServerInfo::default())
        }

        async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
            Ok(self.tools.iter().map(|n| McpTool::new(*n)).collect())
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.clone()));
            if name == "explode" {
                return Err(McpError::ToolExecutionFailed("boom".into()));
            }
            Ok(CallToolResult::structured(
                json!({"success": true, "data": [{"tool": name}]}),
            ))
        }
    }

    struct StubConnector {
        clients: HashMap<String, Arc<RecordingProvider>>,
    }

    #[async_trait]
    impl ProviderConnector for StubConnector {
        async fn connect(
            &self,
            provider: &ProviderDescriptor,
        ) -> McpResult<Arc<dyn ToolProviderClient>> {
            match self.clients.get(&provider.id) {
                Some(client) => Ok(client.clone() as Arc<dyn ToolProviderClient>),
                None => Err(McpError::ConnectionError("refused".into())),
            }
        }
    }

    fn provider(tools: Vec<&'static str>) -> Arc<RecordingProvider> {
        Arc::new(RecordingProvider {
            tools,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn registry(providers: Vec<(&str, Arc<RecordingProvider>)>) -> Arc<ProviderRegistry> {
        let descriptors = providers
            .iter()
            .map(|(id, _)| ProviderDescriptor::in_process(*id))
            .collect();
        let connector = StubConnector {
            clients: providers
                .into_iter()
                .map(|(id, p)| (id.to_string(), p))
                .collect(),
        };
        let transport =
            ProviderTransport::new(Arc::new(connector)).with_retry_policy(RetryPolicy::none());
        Arc::new(ProviderRegistry::new(descriptors, Arc::new(transport)))
    }

    fn call(id: &str, name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, args)
    }

    fn orchestrator(
        registry: Arc<ProviderRegistry>,
        engine: Arc<ScriptedEngine>,
    ) -> Orchestrator {
        Orchestrator::builder()
            .registry(registry)
            .engine(engine)
            .system_prompt("test prompt")
            .build()
            .unwrap()
    }

    fn user() -> AccessContext {
        AccessContext::new("u1")
            .with_email("u1@example.com")
            .with_role("sales")
    }

    // ------------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_immediate_answer() {
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(CompletionResponse::text("42"))]));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["search"]))]), engine.clone());

        let outcome = orch.process("q", &user(), &[], None).await;
        assert!(outcome.success);
        assert_eq!(outcome.response, "42");
        assert_eq!(outcome.rounds, 1);
        assert!(outcome.execution_records.is_empty());
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let crm = provider(vec!["search_accounts"]);
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(CompletionResponse::with_tool_calls(vec![call(
                "c1",
                "search_accounts",
                r#"{"name": "Acme"}"#,
            )])),
            Ok(CompletionResponse::text("Acme has 3 deals")),
        ]));
        let orch = orchestrator(registry(vec![("crm", crm.clone())]), engine.clone());

        let outcome = orch.process("q", &user(), &[], None).await;
        assert!(outcome.success);
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.execution_records.len(), 1);
        assert_eq!(outcome.providers_used, vec!["crm"]);

        let record = &outcome.execution_records[0];
        assert_eq!(record.sequence, 1);
        assert!(record.result.success);
        assert_eq!(record.arguments, json!({"name": "Acme"}));

        let calls = crm.calls.lock().unwrap();
        assert_eq!(calls[0].1["rbac_context"]["email"], "u1@example.com");

        // Round two sees the assistant tool-call turn and the tool result.
        let requests = engine.requests.lock().unwrap();
        let second = &requests[1].messages;
        assert_eq!(second.len(), 4);
        assert_eq!(second[3].tool_call_id.as_deref(), Some("c1"));
        assert!(second[3].text().contains("\"success\":true"));
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_abort() {
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(
            CompletionResponse::with_tool_calls(vec![
                call("c1", "unknown_tool", "{}"),
                call("c2", "search", "{}"),
            ]),
        )]));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["search"]))]), engine);

        let outcome = orch.process("q", &user(), &[], None).await;
        assert!(outcome.success);
        let records = &outcome.execution_records;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].result.error.as_deref(), Some("Tool not found"));
        assert!(records[0].provider_id.is_none());
        assert!(records[1].result.success);
        assert_eq!(
            records.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_invalid_arguments_record() {
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(
            CompletionResponse::with_tool_calls(vec![call("c1", "search", "{not json")]),
        )]));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["search"]))]), engine);

        let outcome = orch.process("q", &user(), &[], None).await;
        let record = &outcome.execution_records[0];
        assert!(!record.result.success);
        assert!(
            record
                .result
                .error
                .as_deref()
                .unwrap()
                .starts_with("Invalid tool arguments: ")
        );
        assert_eq!(record.arguments, Value::String("{not json".into()));
    }

    #[tokio::test]
    async fn test_transport_error_becomes_record() {
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(
            CompletionResponse::with_tool_calls(vec![call("c1", "explode", "{}")]),
        )]));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["explode"]))]), engine);

        let outcome = orch.process("q", &user(), &[], None).await;
        assert!(outcome.success);
        let record = &outcome.execution_records[0];
        assert!(!record.result.success);
        assert!(record.result.error.as_deref().unwrap().contains("boom"));
        assert_eq!(record.provider_id.as_deref(), Some("crm"));
    }

    #[tokio::test]
    async fn test_round_limit() {
        let engine = Arc::new(ScriptedEngine::always(CompletionResponse::with_tool_calls(
            vec![call("c1", "search", "{}")],
        )));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["search"]))]), engine.clone());

        let outcome = orch.process("q", &user(), &[], Some(1)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Max planning rounds reached"));
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.execution_records.len(), 1);
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_round_budget() {
        let engine = Arc::new(ScriptedEngine::new(vec![]));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["search"]))]), engine.clone());

        let outcome = orch.process("q", &user(), &[], Some(0)).await;
        assert_eq!(outcome.error.as_deref(), Some("Max planning rounds reached"));
        assert_eq!(outcome.rounds, 0);
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_providers() {
        let engine = Arc::new(ScriptedEngine::new(vec![]));
        let orch = orchestrator(registry(vec![]), engine.clone());

        let outcome = orch.process("q", &user(), &[], None).await;
        assert_eq!(outcome.error.as_deref(), Some(NO_PROVIDERS_ERROR));
        assert_eq!(outcome.rounds, 0);
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_visible_tools() {
        let engine = Arc::new(ScriptedEngine::new(vec![]));
        let orch = Orchestrator::builder()
            .registry(registry(vec![("crm", provider(vec!["search"]))]))
            .engine(engine.clone())
            .access_policy(AccessPolicy::new().with_unlisted(UnlistedAccess::Deny))
            .build()
            .unwrap();

        let outcome = orch.process("q", &user(), &[], None).await;
        assert_eq!(outcome.error.as_deref(), Some(NO_TOOLS_ERROR));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_invisible_tool_is_not_routed() {
        let crm = provider(vec!["search", "admin_purge"]);
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(
            CompletionResponse::with_tool_calls(vec![call("c1", "admin_purge", "{}")]),
        )]));
        let orch = Orchestrator::builder()
            .registry(registry(vec![("crm", crm.clone())]))
            .engine(engine.clone())
            .access_policy(AccessPolicy::new().with_grant(RoleGrant::new("sales").with_tool("search")))
            .build()
            .unwrap();

        let outcome = orch.process("q", &user(), &[], None).await;
        assert_eq!(
            outcome.execution_records[0].result.error.as_deref(),
            Some("Tool not found")
        );
        assert!(crm.calls.lock().unwrap().is_empty());

        let requests = engine.requests.lock().unwrap();
        let offered: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(offered, vec!["search"]);
    }

    #[tokio::test]
    async fn test_provider_grant_not_bypassed_by_collision() {
        let crm = provider(vec!["search"]);
        let admin = provider(vec!["search"]);
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(
            CompletionResponse::with_tool_calls(vec![call("c1", "search", "{}")]),
        )]));
        let orch = Orchestrator::builder()
            .registry(registry(vec![("crm", crm.clone()), ("admin", admin.clone())]))
            .engine(engine.clone())
            .access_policy(
                AccessPolicy::new().with_grant(RoleGrant::new("sales").with_provider("crm")),
            )
            .build()
            .unwrap();

        // `admin` wins the name under LastWins, and the caller may not use it.
        let outcome = orch.process("q", &user(), &[], None).await;
        assert_eq!(outcome.error.as_deref(), Some(NO_TOOLS_ERROR));
        assert!(crm.calls.lock().unwrap().is_empty());
        assert!(admin.calls.lock().unwrap().is_empty());
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_colliding_tool_offered_once() {
        let crm = provider(vec!["search"]);
        let admin = provider(vec!["search"]);
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(
            CompletionResponse::with_tool_calls(vec![call("c1", "search", "{}")]),
        )]));
        let orch = orchestrator(
            registry(vec![("crm", crm.clone()), ("admin", admin.clone())]),
            engine.clone(),
        );

        let visible = orch.visible_tools(&user()).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].provider_id, "admin");

        let outcome = orch.process("q", &user(), &[], None).await;
        assert_eq!(outcome.providers_used, vec!["admin"]);
        assert_eq!(admin.calls.lock().unwrap().len(), 1);
        assert!(crm.calls.lock().unwrap().is_empty());

        let requests = engine.requests.lock().unwrap();
        let offered: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(offered, vec!["search"]);
    }

    #[tokio::test]
    async fn test_engine_failure() {
        let engine = Arc::new(ScriptedEngine::new(vec![Err(AgentError::EngineError(
            "401".into(),
        ))]));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["search"]))]), engine);

        let outcome = orch.process("q", &user(), &[], None).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("Reasoning engine failure"));
    }

    #[tokio::test]
    async fn test_empty_engine_response_is_failure() {
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(CompletionResponse::default())]));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["search"]))]), engine);

        let outcome = orch.process("q", &user(), &[], None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.rounds, 1);
    }

    #[tokio::test]
    async fn test_tool_calls_win_over_content() {
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(CompletionResponse {
            content: Some("let me check".into()),
            tool_calls: vec![call("c1", "search", "{}")],
        })]));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["search"]))]), engine);

        let outcome = orch.process("q", &user(), &[], None).await;
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.response, "done");
    }

    #[tokio::test]
    async fn test_concurrent_mode_preserves_order() {
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(
            CompletionResponse::with_tool_calls(vec![
                call("c1", "a", "{}"),
                call("c2", "missing", "{}"),
                call("c3", "b", "{}"),
            ]),
        )]));
        let orch = Orchestrator::builder()
            .registry(registry(vec![
                ("one", provider(vec!["a"])),
                ("two", provider(vec!["b"])),
            ]))
            .engine(engine)
            .execution_mode(ExecutionMode::Concurrent { max_in_flight: 3 })
            .build()
            .unwrap();

        let outcome = orch.process("q", &user(), &[], None).await;
        let ids: Vec<&str> = outcome
            .execution_records
            .iter()
            .map(|r| r.tool_call_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(outcome.providers_used, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_engine_supplied_access_context_is_replaced() {
        let crm = provider(vec!["search"]);
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(
            CompletionResponse::with_tool_calls(vec![call(
                "c1",
                "search",
                r#"{"rbac_context": {"email": "spoof@example.com"}}"#,
            )]),
        )]));
        let orch = orchestrator(registry(vec![("crm", crm.clone())]), engine);

        let outcome = orch.process("q", &user(), &[], None).await;
        assert_eq!(outcome.execution_records[0].arguments, json!({}));
        let calls = crm.calls.lock().unwrap();
        assert_eq!(calls[0].1["rbac_context"]["email"], "u1@example.com");
    }

    #[tokio::test]
    async fn test_process_in_session_appends_turns() {
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(CompletionResponse::text("first")),
            Ok(CompletionResponse::text("second")),
        ]));
        let orch = orchestrator(registry(vec![("crm", provider(vec!["search"]))]), engine.clone());

        orch.process_in_session("s1", "one", &user(), None).await.unwrap();
        orch.process_in_session("s1", "two", &user(), None).await.unwrap();

        let requests = engine.requests.lock().unwrap();
        let second = &requests[1].messages;
        // system + (user, assistant) + user
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].text(), "first");
    }

    #[tokio::test]
    async fn test_invalidate_caches_forces_rediscovery() {
        let engine = Arc::new(ScriptedEngine::new(vec![]));
        let registry = registry(vec![("crm", provider(vec!["search"]))]);
        let orch = orchestrator(registry.clone(), engine);

        orch.process("q", &user(), &[], None).await;
        assert!(registry.is_loaded().await);

        orch.invalidate_caches().await;
        assert!(!registry.is_loaded().await);
    }

    #[test]
    fn test_parse_arguments() {
        assert!(parse_arguments("").unwrap().is_empty());
        assert!(parse_arguments("[1]").unwrap_err().contains("an array"));
        assert!(parse_arguments("{").is_err());
    }
}
