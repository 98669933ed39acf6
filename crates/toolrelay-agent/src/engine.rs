//! Reasoning engine abstraction.
//!
//! The planning loop and the query generator only see [`ReasoningEngine`];
//! the OpenAI-compatible HTTP client lives in [`crate::openai`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use toolrelay_core::{ChatMessage, ToolCallRequest, ToolSchema};

use crate::error::AgentResult;

/// Whether the engine may answer in text or must call a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::Required => "required",
        }
    }
}

/// One request to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub tool_choice: ToolChoice,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }
}

/// The engine's answer: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Non-blank text content, if any.
    pub fn text_content(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> AgentResult<CompletionResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content_ignores_blank() {
        assert_eq!(CompletionResponse::text("  ").text_content(), None);
        assert_eq!(CompletionResponse::text(" hi ").text_content(), Some("hi"));
        assert_eq!(CompletionResponse::default().text_content(), None);
    }

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("hello")])
            .with_tool_choice(ToolChoice::Required);
        assert_eq!(request.tool_choice.as_str(), "required");
        assert!(request.tools.is_empty());
    }
}
