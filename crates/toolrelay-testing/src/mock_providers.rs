//! # Mock Providers
//!
//! [`MockProvider`] answers `tools/call` with scripted results and records
//! every call. [`MockConnector`] hands out mock providers by provider id and
//! can simulate unreachable endpoints.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use toolrelay_core::ProviderDescriptor;
use toolrelay_mcp::{
    CallToolResult, McpError, McpResult, McpTool, ProviderConnector, ServerInfo,
    ToolProviderClient,
};

use crate::lock;

/// One recorded `tools/call`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub tool: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
enum Scripted {
    Result(CallToolResult),
    Transport(String),
}

/// A tool provider with scripted responses.
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    tools: Vec<McpTool>,
    responses: HashMap<String, Scripted>,
    default_response: Option<Scripted>,
    fail_listing: bool,
    call_history: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            responses: HashMap::new(),
            default_response: None,
            fail_listing: false,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Declare a tool with a permissive object schema
    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.tools.push(
            McpTool::new(&name)
                .with_description(format!("Mock tool {name}"))
                .with_input_schema(json!({"type": "object"})),
        );
        self
    }

    /// Declare a fully described tool
    pub fn with_tool_descriptor(mut self, tool: McpTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Successful structured result `{success: true, data}` for `tool`
    pub fn with_data(mut self, tool: impl Into<String>, data: Value) -> Self {
        self.responses.insert(
            tool.into(),
            Scripted::Result(CallToolResult::structured(
                json!({"success": true, "data": data}),
            )),
        );
        self
    }

    /// Raw MCP result for `tool`
    pub fn with_result(mut self, tool: impl Into<String>, result: CallToolResult) -> Self {
        self.responses.insert(tool.into(), Scripted::Result(result));
        self
    }

    /// Tool-level error (`isError: true`) for `tool`
    pub fn with_tool_error(mut self, tool: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .insert(tool.into(), Scripted::Result(CallToolResult::error(message)));
        self
    }

    /// Transport failure for `tool`
    pub fn with_transport_failure(
        mut self,
        tool: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.responses
            .insert(tool.into(), Scripted::Transport(message.into()));
        self
    }

    /// Result for tools without a scripted response
    pub fn with_default_data(mut self, data: Value) -> Self {
        self.default_response = Some(Scripted::Result(CallToolResult::structured(
            json!({"success": true, "data": data}),
        )));
        self
    }

    /// Make `tools/list` fail
    pub fn failing_tool_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call_count(&self) -> usize {
        lock(&self.call_history).len()
    }

    pub fn call_history(&self) -> Vec<RecordedCall> {
        lock(&self.call_history).clone()
    }

    pub fn was_called_with(&self, tool: &str) -> bool {
        lock(&self.call_history).iter().any(|c| c.tool == tool)
    }

    pub fn reset(&self) {
        lock(&self.call_history).clear();
    }
}

#[async_trait]
impl ToolProviderClient for MockProvider {
    async fn initialize(&self) -> McpResult<ServerInfo> {
        Ok(ServerInfo {
            name: self.name.clone(),
            version: "mock".to_string(),
        })
    }

    async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        if self.fail_listing {
            return Err(McpError::ProtocolError(format!(
                "{} cannot list tools",
                self.name
            )));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        lock(&self.call_history).push(RecordedCall {
            tool: name.to_string(),
            arguments,
        });

        if !self.tools.iter().any(|t| t.name == name) {
            return Err(McpError::ToolNotFound(name.to_string()));
        }

        match self.responses.get(name).or(self.default_response.as_ref()) {
            Some(Scripted::Result(result)) => Ok(result.clone()),
            Some(Scripted::Transport(message)) => Err(McpError::ConnectionError(message.clone())),
            None => Ok(CallToolResult::structured(
                json!({"success": true, "data": null}),
            )),
        }
    }
}

/// Connector resolving provider ids to registered clients.
#[derive(Clone, Default)]
pub struct MockConnector {
    clients: HashMap<String, Arc<dyn ToolProviderClient>>,
    unreachable: HashSet<String>,
    connect_count: Arc<Mutex<usize>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mock provider under its own name
    pub fn with_provider(self, provider: MockProvider) -> Self {
        let id = provider.name().to_string();
        self.with_client(id, Arc::new(provider))
    }

    /// Register any client under `provider_id`
    pub fn with_client(
        mut self,
        provider_id: impl Into<String>,
        client: Arc<dyn ToolProviderClient>,
    ) -> Self {
        self.clients.insert(provider_id.into(), client);
        self
    }

    /// Refuse connections to `provider_id`
    pub fn with_unreachable(mut self, provider_id: impl Into<String>) -> Self {
        self.unreachable.insert(provider_id.into());
        self
    }

    /// Descriptors for every registered and unreachable provider, in id order
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut ids: Vec<&String> = self.clients.keys().chain(self.unreachable.iter()).collect();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .map(|id| ProviderDescriptor::in_process(id.clone()))
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        *lock(&self.connect_count)
    }
}

#[async_trait]
impl ProviderConnector for MockConnector {
    async fn connect(&self, provider: &ProviderDescriptor) -> McpResult<Arc<dyn ToolProviderClient>> {
        *lock(&self.connect_count) += 1;

        if self.unreachable.contains(&provider.id) {
            return Err(McpError::ConnectionError(format!(
                "connection refused: {}",
                provider.endpoint
            )));
        }
        let client = self
            .clients
            .get(&provider.id)
            .cloned()
            .ok_or_else(|| McpError::InvalidEndpoint(provider.endpoint.clone()))?;
        client.initialize().await?;
        Ok(client)
    }
}
