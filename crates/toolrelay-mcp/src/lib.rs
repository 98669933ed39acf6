//! # toolrelay MCP - Provider Transport
//!
//! Talks to tool providers over the Model Context Protocol.
//!
//! ## Components
//!
//! - **[`ToolProviderClient`]**: the operations a provider must support
//!   (`initialize`, `tools/list`, `tools/call`)
//! - **[`HttpMcpClient`]**: MCP over streamable HTTP, JSON or SSE responses
//! - **[`ProviderConnector`]**: turns a `ProviderDescriptor` into a live handle
//! - **[`ProviderTransport`]**: per-provider handle cache with explicit
//!   invalidation; every call result normalized to `{success, data, error}`
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolrelay_core::ProviderDescriptor;
//! use toolrelay_mcp::{DefaultConnector, ProviderTransport};
//!
//! let transport = ProviderTransport::new(Arc::new(DefaultConnector::new()));
//! let crm = ProviderDescriptor::http("crm", "http://localhost:8001/mcp");
//!
//! let result = transport
//!     .invoke(&crm, "search_accounts", serde_json::json!({"name": "Acme"}))
//!     .await;
//! println!("success={} data={:?}", result.success, result.data);
//! ```

pub mod client;
pub mod connector;
pub mod error;
pub mod normalize;
pub mod protocol;
pub mod transport;

pub use client::{DEFAULT_TIMEOUT, HttpMcpClient, ToolProviderClient};
pub use connector::{DefaultConnector, ProviderConnector};
pub use error::{McpError, McpResult};
pub use normalize::{normalize_call_result, normalize_error};
pub use protocol::{CallToolResult, ContentBlock, McpTool, ServerInfo};
pub use transport::ProviderTransport;
