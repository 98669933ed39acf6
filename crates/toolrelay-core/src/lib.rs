//! # toolrelay Core
//!
//! Core types for the toolrelay orchestration engine: provider and tool
//! descriptors, the caller's access context, conversation messages,
//! execution records, the routing table, the access policy filter and the
//! transient retry policy.
//!
//! Everything in this crate is transport-agnostic. Talking to providers lives
//! in `toolrelay-mcp`; the planning loop lives in `toolrelay-agent`.

pub mod access;
pub mod error;
pub mod retry;
pub mod routing;
pub mod types;

pub use access::{AccessPolicy, RoleGrant, ToolRestriction, UnlistedAccess};
pub use error::{CoreError, CoreResult};
pub use retry::RetryPolicy;
pub use routing::{CollisionPolicy, Route, RoutingTable, ToolCollision};
pub use types::{
    ACCESS_CONTEXT_ARGUMENT, AccessContext, AccessScope, ChatMessage, ExecutionRecord,
    MessageRole, NormalizedResult, ProviderDescriptor, ToolCallRequest, ToolDescriptor,
    ToolSchema, TransportKind,
};
