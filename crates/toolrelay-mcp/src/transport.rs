//! Provider Transport
//!
//! Owns one client handle per provider id. Handles are created lazily on
//! first use through the [`ProviderConnector`] and reused until explicitly
//! invalidated, or until a call fails at the connection level.
//!
//! [`ProviderTransport::invoke`] never returns an error: every failure comes
//! back as a `{success: false, error}` [`NormalizedResult`] so the planning
//! loop can record it and continue.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use toolrelay_core::{NormalizedResult, ProviderDescriptor, RetryPolicy, ToolDescriptor};
use tracing::{debug, info, warn};

use crate::client::ToolProviderClient;
use crate::connector::ProviderConnector;
use crate::error::McpResult;
use crate::normalize::{normalize_call_result, normalize_error};
use crate::protocol::{CallToolResult, McpTool, ServerInfo};

pub struct ProviderTransport {
    connector: Arc<dyn ProviderConnector>,
    clients: RwLock<HashMap<String, Arc<dyn ToolProviderClient>>>,
    retry: RetryPolicy,
}

impl ProviderTransport {
    pub fn new(connector: Arc<dyn ProviderConnector>) -> Self {
        Self {
            connector,
            clients: RwLock::new(HashMap::new()),
            retry: RetryPolicy::default(),
        }
    }

    /// Backoff applied to connection-level failures.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cached handle for `provider`, connecting on first use.
    pub async fn client_for(
        &self,
        provider: &ProviderDescriptor,
    ) -> McpResult<Arc<dyn ToolProviderClient>> {
        if let Some(client) = self.clients.read().await.get(&provider.id) {
            return Ok(Arc::clone(client));
        }

        let client = self.connector.connect(provider).await?;

        // Another task may have connected concurrently; keep whichever landed first.
        let mut clients = self.clients.write().await;
        let cached = clients
            .entry(provider.id.clone())
            .or_insert_with(|| Arc::clone(&client));
        debug!(provider_id = %provider.id, "Provider connection cached");
        Ok(Arc::clone(cached))
    }

    /// Connect (or reuse the handle) and return the provider's server info.
    pub async fn connect(&self, provider: &ProviderDescriptor) -> McpResult<ServerInfo> {
        let client = self
            .retry
            .execute(|| self.client_for(provider), |e| e.is_retryable())
            .await?;
        client.initialize().await
    }

    /// List the provider's tools, tagged with its id.
    pub async fn list_tools(&self, provider: &ProviderDescriptor) -> McpResult<Vec<ToolDescriptor>> {
        let tools = self
            .retry
            .execute(|| self.list_once(provider), |e| e.is_retryable())
            .await?;

        Ok(tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                description: tool.description.unwrap_or_default(),
                name: tool.name,
                parameters: tool.input_schema,
                provider_id: provider.id.clone(),
                allowed_roles: Vec::new(),
            })
            .collect())
    }

    /// Invoke `tool_name` on `provider`.
    pub async fn invoke(
        &self,
        provider: &ProviderDescriptor,
        tool_name: &str,
        arguments: Value,
    ) -> NormalizedResult {
        let started = Instant::now();
        let outcome = self
            .retry
            .execute(
                || self.call_once(provider, tool_name, &arguments),
                |e| e.is_retryable(),
            )
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(raw) => {
                let normalized = normalize_call_result(raw);
                info!(
                    provider_id = %provider.id,
                    tool = %tool_name,
                    success = normalized.success,
                    duration_ms,
                    "Tool invoked"
                );
                normalized
            }
            Err(e) => {
                warn!(
                    provider_id = %provider.id,
                    tool = %tool_name,
                    error_code = e.error_code(),
                    error = %e,
                    duration_ms,
                    "Tool invocation failed"
                );
                normalize_error(&e)
            }
        }
    }

    async fn list_once(&self, provider: &ProviderDescriptor) -> McpResult<Vec<McpTool>> {
        let client = self.client_for(provider).await?;
        let result = client.list_tools().await;
        if let Err(e) = &result
            && e.invalidates_connection()
        {
            self.invalidate(&provider.id).await;
        }
        result
    }

    async fn call_once(
        &self,
        provider: &ProviderDescriptor,
        tool_name: &str,
        arguments: &Value,
    ) -> McpResult<CallToolResult> {
        let client = self.client_for(provider).await?;
        let result = client.call_tool(tool_name, arguments.clone()).await;
        if let Err(e) = &result
            && e.invalidates_connection()
        {
            self.invalidate(&provider.id).await;
        }
        result
    }

    /// Drop the cached handle for one provider.
    pub async fn invalidate(&self, provider_id: &str) {
        if self.clients.write().await.remove(provider_id).is_some() {
            debug!(provider_id = %provider_id, "Provider connection invalidated");
        }
    }

    /// Drop every cached handle.
    pub async fn clear(&self) {
        self.clients.write().await.clear();
    }

    /// Number of cached handles.
    pub async fn cached_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::McpError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoClient;

    #[async_trait]
    impl ToolProviderClient for EchoClient {
        async fn initialize(&self) -> McpResult<ServerInfo> {
            Ok(ServerInfo::default())
        }

        async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
            Ok(vec![McpTool::new("echo").with_description("Echo input")])
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
            if name == "explode" {
                return Err(McpError::ConnectionError("reset by peer".into()));
            }
            Ok(CallToolResult::structured(json!({"success": true, "data": arguments})))
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl ProviderConnector for CountingConnector {
        async fn connect(
            &self,
            provider: &ProviderDescriptor,
        ) -> McpResult<Arc<dyn ToolProviderClient>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if provider.id == "down" {
                return Err(McpError::ConnectionError("refused".into()));
            }
            Ok(Arc::new(EchoClient))
        }
    }

    fn transport(connector: Arc<CountingConnector>) -> ProviderTransport {
        ProviderTransport::new(connector)
            .with_retry_policy(RetryPolicy::new(2).with_base_delay(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_handle_created_once_and_reused() {
        let connector = Arc::new(CountingConnector::default());
        let transport = transport(Arc::clone(&connector));
        let provider = ProviderDescriptor::http("echo", "http://echo/mcp");

        for _ in 0..3 {
            let result = transport.invoke(&provider, "echo", json!({"x": 1})).await;
            assert!(result.success);
            assert_eq!(result.data, Some(json!({"x": 1})));
        }

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(transport.cached_count().await, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reconnect() {
        let connector = Arc::new(CountingConnector::default());
        let transport = transport(Arc::clone(&connector));
        let provider = ProviderDescriptor::http("echo", "http://echo/mcp");

        transport.invoke(&provider, "echo", json!({})).await;
        transport.invalidate("echo").await;
        assert_eq!(transport.cached_count().await, 0);
        transport.invoke(&provider, "echo", json!({})).await;

        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_failure_becomes_failed_result() {
        let connector = Arc::new(CountingConnector::default());
        let transport = transport(Arc::clone(&connector));
        let provider = ProviderDescriptor::http("down", "http://down/mcp");

        let result = transport.invoke(&provider, "echo", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Connection error: refused"));
        // retried once
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_call_failure_drops_handle() {
        let connector = Arc::new(CountingConnector::default());
        let transport = transport(Arc::clone(&connector));
        let provider = ProviderDescriptor::http("echo", "http://echo/mcp");

        let result = transport.invoke(&provider, "explode", json!({})).await;
        assert!(!result.success);
        assert_eq!(transport.cached_count().await, 0);
    }

    #[tokio::test]
    async fn test_list_tools_tags_provider() {
        let connector = Arc::new(CountingConnector::default());
        let transport = transport(connector);
        let provider = ProviderDescriptor::http("echo", "http://echo/mcp");

        let tools = transport.list_tools(&provider).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].provider_id, "echo");
        assert_eq!(tools[0].description, "Echo input");
    }
}
