//! Connection establishment.
//!
//! A [`ProviderConnector`] turns a [`ProviderDescriptor`] into a live,
//! initialized client handle. The transport calls it once per provider and
//! caches the result.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use toolrelay_core::{ProviderDescriptor, TransportKind};

use crate::client::{DEFAULT_TIMEOUT, HttpMcpClient, ToolProviderClient};
use crate::error::{McpError, McpResult};

/// Creates client handles for providers.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Open and initialize a handle for `provider`.
    async fn connect(&self, provider: &ProviderDescriptor) -> McpResult<Arc<dyn ToolProviderClient>>;
}

/// Connector for HTTP providers plus providers registered in-process.
pub struct DefaultConnector {
    timeout: Duration,
    bearer_token: Option<String>,
    in_process: HashMap<String, Arc<dyn ToolProviderClient>>,
}

impl Default for DefaultConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            bearer_token: None,
            in_process: HashMap::new(),
        }
    }

    /// Per-request timeout for HTTP providers.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bearer token sent to every HTTP provider.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Register a client served for `TransportKind::InProcess` descriptors
    /// with id `provider_id`.
    pub fn with_in_process(
        mut self,
        provider_id: impl Into<String>,
        client: Arc<dyn ToolProviderClient>,
    ) -> Self {
        self.in_process.insert(provider_id.into(), client);
        self
    }

    fn http_client(&self) -> McpResult<Client> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(format!("toolrelay-mcp/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| McpError::ConnectionError(format!("Failed to create HTTP client: {}", e)))
    }
}

#[async_trait]
impl ProviderConnector for DefaultConnector {
    async fn connect(&self, provider: &ProviderDescriptor) -> McpResult<Arc<dyn ToolProviderClient>> {
        let client: Arc<dyn ToolProviderClient> = match provider.transport {
            TransportKind::Http => {
                let mut client =
                    HttpMcpClient::with_http_client(&provider.endpoint, self.http_client()?)?;
                if let Some(token) = &self.bearer_token {
                    client = client.with_bearer_token(token.clone());
                }
                Arc::new(client)
            }
            TransportKind::InProcess => self
                .in_process
                .get(&provider.id)
                .cloned()
                .ok_or_else(|| {
                    McpError::ConnectionError(format!(
                        "No in-process provider registered as '{}'",
                        provider.id
                    ))
                })?,
        };

        client.initialize().await?;
        Ok(client)
    }
}
