//! MCP Provider Client
//!
//! [`ToolProviderClient`] is the seam between the transport and a concrete
//! provider. [`HttpMcpClient`] speaks MCP over streamable HTTP: JSON-RPC 2.0
//! requests POSTed to a single endpoint, answered either with a JSON body or
//! with a `text/event-stream` body carrying the response as an SSE event.
//!
//! # Session handling
//!
//! The first call on a client performs the `initialize` handshake followed by
//! a `notifications/initialized` notification. If the server hands out an
//! `Mcp-Session-Id` header it is echoed on every subsequent request.
//!
//! # Error mapping
//!
//! | Condition | Error | Retryable |
//! |-----------|-------|-----------|
//! | connect failure | `ConnectionError` | Yes |
//! | request timeout | `Timeout` | Yes |
//! | HTTP 429/502/503/504 | `ConnectionError` | Yes |
//! | other non-2xx | `TransportError` | No |
//! | JSON-RPC `error` | `ServerError` | No |

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::error::{McpError, McpResult};
use crate::protocol::{
    CallToolResult, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool,
    PROTOCOL_VERSION, SESSION_HEADER, ServerInfo, parse_sse_body,
};

/// Default timeout for provider requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on `tools/list` pages followed for one listing
const MAX_LIST_PAGES: usize = 64;

/// Operations the transport needs from a tool provider.
#[async_trait]
pub trait ToolProviderClient: Send + Sync {
    /// Handshake with the provider. Idempotent.
    async fn initialize(&self) -> McpResult<ServerInfo>;

    /// All tools the provider exposes.
    async fn list_tools(&self) -> McpResult<Vec<McpTool>>;

    /// Invoke `name` with `arguments`.
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult>;
}

/// MCP client over streamable HTTP.
pub struct HttpMcpClient {
    endpoint: Url,
    http: Client,
    bearer_token: Option<String>,
    session_id: RwLock<Option<String>>,
    server_info: RwLock<Option<ServerInfo>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for HttpMcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMcpClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("has_auth", &self.bearer_token.is_some())
            .finish()
    }
}

impl HttpMcpClient {
    /// Create a client for `endpoint` with the default timeout.
    pub fn new(endpoint: impl AsRef<str>) -> McpResult<Self> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl AsRef<str>, timeout: Duration) -> McpResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(format!("toolrelay-mcp/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| McpError::ConnectionError(format!("Failed to create HTTP client: {}", e)))?;
        Self::with_http_client(endpoint, http)
    }

    /// Create a client sharing an existing `reqwest::Client` (connection pool).
    pub fn with_http_client(endpoint: impl AsRef<str>, http: Client) -> McpResult<Self> {
        let endpoint = Url::parse(endpoint.as_ref())
            .map_err(|e| McpError::InvalidEndpoint(format!("{}: {}", endpoint.as_ref(), e)))?;

        Ok(Self {
            endpoint,
            http,
            bearer_token: None,
            session_id: RwLock::new(None),
            server_info: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Session id assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn post(&self, body: &JsonRpcRequest) -> McpResult<reqwest::Response> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(header::ACCEPT, "application/json, text/event-stream")
            .json(body);

        if let Some(session) = self.session_id.read().await.clone() {
            request = request.header(SESSION_HEADER, session);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("HTTP {} from {}: {}", status, self.endpoint, text);
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT => McpError::ConnectionError(message),
                _ => McpError::TransportError(message),
            });
        }

        Ok(response)
    }

    async fn rpc(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest::call(id, method, params);

        debug!(endpoint = %self.endpoint, method, id, "Sending MCP request");

        let response = self.post(&body).await?;
        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/event-stream"));

        let text = response.text().await?;
        let payload = if is_event_stream {
            parse_sse_body(&text)
                .ok_or_else(|| McpError::ProtocolError("event stream carried no data".into()))?
        } else {
            text
        };

        let rpc: JsonRpcResponse = serde_json::from_str(&payload)
            .map_err(|e| McpError::ProtocolError(format!("Invalid JSON-RPC response: {}", e)))?;
        rpc.into_result()
    }

    async fn notify(&self, method: &str) -> McpResult<()> {
        self.post(&JsonRpcRequest::notification(method)).await?;
        Ok(())
    }

    async fn ensure_initialized(&self) -> McpResult<()> {
        if self.server_info.read().await.is_some() {
            return Ok(());
        }
        self.initialize().await.map(|_| ())
    }
}

#[async_trait]
impl ToolProviderClient for HttpMcpClient {
    async fn initialize(&self) -> McpResult<ServerInfo> {
        if let Some(info) = self.server_info.read().await.clone() {
            return Ok(info);
        }

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "toolrelay",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result: InitializeResult = serde_json::from_value(self.rpc("initialize", Some(params)).await?)?;

        if let Err(e) = self.notify("notifications/initialized").await {
            debug!(endpoint = %self.endpoint, error = %e, "Initialized notification rejected");
        }

        info!(
            endpoint = %self.endpoint,
            server = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP session initialized"
        );

        *self.server_info.write().await = Some(result.server_info.clone());
        Ok(result.server_info)
    }

    async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        self.ensure_initialized().await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult = serde_json::from_value(self.rpc("tools/list", params).await?)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(endpoint = %self.endpoint, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        self.ensure_initialized().await?;

        let params = json!({ "name": name, "arguments": arguments });
        let result = self.rpc("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }
}
