//! # Mock Reasoning Engine
//!
//! A scripted [`ReasoningEngine`]: responses are served in order, then a
//! fallback response is repeated. Every request is recorded.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use toolrelay_agent::{AgentError, AgentResult, CompletionRequest, CompletionResponse, ReasoningEngine};
use toolrelay_core::ToolCallRequest;

use crate::lock;

#[derive(Debug, Clone)]
pub struct MockReasoningEngine {
    script: Arc<Mutex<VecDeque<Result<CompletionResponse, String>>>>,
    fallback: Option<CompletionResponse>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl Default for MockReasoningEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockReasoningEngine {
    /// Engine with an empty script and no fallback; every call fails.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Engine that always answers with `text`.
    pub fn answering(text: impl Into<String>) -> Self {
        Self::new().with_fallback(CompletionResponse::text(text))
    }

    /// Engine that requests the same tool call on every round.
    pub fn always_calling(tool: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::new().with_fallback(CompletionResponse::with_tool_calls(vec![
            ToolCallRequest::new("call_loop", tool, arguments),
        ]))
    }

    /// Queue a text answer
    pub fn then_answer(self, text: impl Into<String>) -> Self {
        self.then_respond(CompletionResponse::text(text))
    }

    /// Queue a round requesting one tool call
    pub fn then_call(
        self,
        id: impl Into<String>,
        tool: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        self.then_respond(CompletionResponse::with_tool_calls(vec![
            ToolCallRequest::new(id, tool, arguments),
        ]))
    }

    /// Queue an arbitrary response
    pub fn then_respond(self, response: CompletionResponse) -> Self {
        lock(&self.script).push_back(Ok(response));
        self
    }

    /// Queue an engine error
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        lock(&self.script).push_back(Err(message.into()));
        self
    }

    /// Response repeated once the script runs out
    pub fn with_fallback(mut self, response: CompletionResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Number of completion requests received
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Every request received, oldest first
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    /// Most recent request, if any
    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.requests).last().cloned()
    }

    pub fn reset(&self) {
        lock(&self.requests).clear();
    }
}

#[async_trait]
impl ReasoningEngine for MockReasoningEngine {
    async fn complete(&self, request: CompletionRequest) -> AgentResult<CompletionResponse> {
        lock(&self.requests).push(request);

        match lock(&self.script).pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(AgentError::EngineError(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::EngineError("mock engine script exhausted".to_string())),
        }
    }
}
