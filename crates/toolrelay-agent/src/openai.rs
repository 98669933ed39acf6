//! OpenAI-compatible chat completions client.
//!
//! Works against any server exposing `POST {base_url}/chat/completions` with
//! function-style tools (OpenAI, Azure OpenAI deployments behind a proxy,
//! vLLM, Ollama's OpenAI endpoint).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use toolrelay_core::{ChatMessage, MessageRole, RetryPolicy, ToolCallRequest, ToolSchema};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::{CompletionRequest, CompletionResponse, ReasoningEngine};
use crate::error::{AgentError, AgentResult};

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: MessageRole,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls: (!message.tool_calls.is_empty()).then(|| {
                message
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: function_type(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

impl From<&ToolSchema> for WireTool {
    fn from(schema: &ToolSchema) -> Self {
        Self {
            kind: "function",
            function: WireFunction {
                name: schema.name.clone(),
                description: schema.description.clone(),
                parameters: schema.parameters.clone(),
            },
        }
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct OpenAiCompatibleEngine {
    http: Client,
    config: EngineConfig,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiCompatibleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleEngine")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish()
    }
}

impl OpenAiCompatibleEngine {
    pub fn new(config: EngineConfig) -> AgentResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::EngineError(format!("Failed to create HTTP client: {}", e)))?;
        let retry = RetryPolicy::new(config.retry_attempts.max(1));

        Ok(Self {
            http,
            config,
            retry,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn complete_once(&self, body: &WireRequest<'_>) -> AgentResult<CompletionResponse> {
        let mut request = self.http.post(self.completions_url()).json(body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout(format!("after {}s", self.config.timeout_secs))
            } else if e.is_connect() {
                AgentError::EngineUnavailable(format!("Request failed: {}", e))
            } else {
                AgentError::EngineError(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status, truncate(&detail, 300));
            return Err(
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    AgentError::EngineUnavailable(message)
                } else {
                    AgentError::EngineError(message)
                },
            );
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::InvalidResponse("response has no choices".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content,
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| {
                    // Some compatible servers omit call ids; tool results must still pair up.
                    let id = if call.id.is_empty() {
                        format!("call_{}", uuid::Uuid::new_v4().simple())
                    } else {
                        call.id
                    };
                    ToolCallRequest::new(id, call.function.name, call.function.arguments)
                })
                .collect(),
        })
    }
}

#[async_trait]
impl ReasoningEngine for OpenAiCompatibleEngine {
    async fn complete(&self, request: CompletionRequest) -> AgentResult<CompletionResponse> {
        let has_tools = !request.tools.is_empty();
        let body = WireRequest {
            model: &self.config.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request.tools.iter().map(WireTool::from).collect(),
            tool_choice: has_tools.then(|| request.tool_choice.as_str()),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let started = Instant::now();
        let result = self
            .retry
            .execute(|| self.complete_once(&body), AgentError::is_retryable)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => debug!(
                model = %self.config.model,
                tool_calls = response.tool_calls.len(),
                duration_ms,
                "Engine completion received"
            ),
            Err(e) => warn!(
                model = %self.config.model,
                error_code = e.error_code(),
                error = %e,
                duration_ms,
                "Engine completion failed"
            ),
        }
        result
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
