//! Domain types shared across the orchestration engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::fmt;

/// Argument name under which the caller's access context is forwarded to
/// every tool invocation.
pub const ACCESS_CONTEXT_ARGUMENT: &str = "rbac_context";

// ============================================================================
// Providers and Tools
// ============================================================================

/// How a provider is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// MCP JSON-RPC over streamable HTTP
    #[default]
    Http,
    /// A provider registered inside this process
    InProcess,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::InProcess => write!(f, "in_process"),
        }
    }
}

/// A configured tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Provider identifier, unique within one configuration
    pub id: String,
    /// Endpoint URL (or a logical name for in-process providers)
    pub endpoint: String,
    /// Transport used to reach the provider
    #[serde(default)]
    pub transport: TransportKind,
    /// Disabled providers are never contacted
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderDescriptor {
    /// Create an enabled HTTP provider.
    pub fn http(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            transport: TransportKind::Http,
            enabled: true,
        }
    }

    /// Create an enabled in-process provider.
    pub fn in_process(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            endpoint: format!("inproc://{}", id),
            id,
            transport: TransportKind::InProcess,
            enabled: true,
        }
    }

    /// Mark the provider as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A tool exposed by a provider, tagged with its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool's arguments
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
    /// Id of the provider that declared the tool
    pub provider_id: String,
    /// Roles allowed to see this tool; empty means no tool-level restriction
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_roles: Vec<String>,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: empty_object_schema(),
            provider_id: provider_id.into(),
            allowed_roles: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_allowed_role(mut self, role: impl Into<String>) -> Self {
        self.allowed_roles.push(role.into());
        self
    }

    /// Schema handed to the reasoning engine.
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// `{name, description, parameters}` as presented to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ============================================================================
// Access Context
// ============================================================================

/// Which rows of data the caller may see. Interpreted by providers, not here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessScope {
    #[serde(default)]
    pub account_ids: Vec<String>,
    #[serde(default)]
    pub all_accounts: bool,
    #[serde(default)]
    pub owned_only: bool,
    #[serde(default)]
    pub team_access: bool,
}

/// Caller identity, roles and data-visibility scope.
///
/// Built by the caller (identity verification is not this crate's concern)
/// and forwarded unchanged into every tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessContext {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub scope: AccessScope,
}

impl AccessContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_scope(mut self, scope: AccessScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// JSON form injected as the `rbac_context` argument.
    pub fn to_argument_value(&self) -> Value {
        json!({
            "user_id": self.user_id,
            "email": self.email,
            "tenant_id": self.tenant_id,
            "roles": self.roles,
            "permissions": self.permissions,
            "access_scope": {
                "account_ids": self.scope.account_ids,
                "all_accounts": self.scope.all_accounts,
                "owned_only": self.scope.owned_only,
                "team_access": self.scope.team_access,
            },
        })
    }
}

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call proposed by the reasoning engine. `arguments` is the raw JSON
/// string exactly as the engine produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One role-tagged conversation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Result of one tool call, answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

// ============================================================================
// Results and Trace
// ============================================================================

/// Canonical `{success, data, error}` shape every provider response is
/// mapped onto. Extra top-level fields reported by the provider are kept in
/// `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl NormalizedResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Interpret an arbitrary provider payload.
    ///
    /// An object carrying a boolean `success` is taken as already canonical:
    /// `data` and `error` are lifted out and every other field becomes
    /// metadata. Anything else is successful data.
    pub fn from_payload(payload: Value) -> Self {
        match payload {
            Value::Object(mut fields) if matches!(fields.get("success"), Some(Value::Bool(_))) => {
                let success = matches!(fields.remove("success"), Some(Value::Bool(true)));
                let data = fields.remove("data").filter(|v| !v.is_null());
                let error = match fields.remove("error") {
                    Some(Value::String(message)) => Some(message),
                    Some(Value::Null) | None => None,
                    Some(other) => Some(other.to_string()),
                };
                let error = if success {
                    error
                } else {
                    error.or_else(|| Some("Tool reported failure".to_string()))
                };
                Self {
                    success,
                    data,
                    error,
                    metadata: fields,
                }
            }
            other => Self::success(other),
        }
    }

    /// Serialized form appended to the conversation as a tool message.
    pub fn to_message_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            json!({"success": false, "error": format!("Unserializable result: {}", e)}).to_string()
        })
    }
}

/// One attempted tool call within a `process` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Strictly increasing across the whole `process` call
    pub sequence: u64,
    pub tool_call_id: String,
    pub tool_name: String,
    /// `None` when the call could not be routed
    pub provider_id: Option<String>,
    /// Arguments as the engine sent them, without the injected access context
    pub arguments: Value,
    pub result: NormalizedResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_descriptor_defaults() {
        let provider: ProviderDescriptor =
            serde_json::from_str(r#"{"id": "sql", "endpoint": "http://localhost:8001/mcp"}"#)
                .unwrap();
        assert_eq!(provider.transport, TransportKind::Http);
        assert!(provider.enabled);

        let local = ProviderDescriptor::in_process("query").disabled();
        assert_eq!(local.endpoint, "inproc://query");
        assert!(!local.enabled);
    }

    #[test]
    fn test_access_context_argument_value() {
        let ctx = AccessContext::new("u-1")
            .with_email("ada@example.com")
            .with_roles(["analyst", "viewer"]);
        let value = ctx.to_argument_value();

        assert_eq!(value["user_id"], "u-1");
        assert_eq!(value["email"], "ada@example.com");
        assert_eq!(value["roles"], json!(["analyst", "viewer"]));
        assert_eq!(value["access_scope"]["all_accounts"], false);
    }

    #[test]
    fn test_normalized_from_canonical_payload() {
        let result = NormalizedResult::from_payload(json!({
            "success": true,
            "data": [{"id": 1}],
            "row_count": 1
        }));
        assert!(result.success);
        assert_eq!(result.data, Some(json!([{"id": 1}])));
        assert_eq!(result.metadata.get("row_count"), Some(&json!(1)));

        let failed = NormalizedResult::from_payload(json!({"success": false}));
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("Tool reported failure"));
    }

    #[test]
    fn test_normalized_from_plain_payload() {
        let result = NormalizedResult::from_payload(json!({"temperature": 21}));
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"temperature": 21})));
        assert!(result.metadata.is_empty());
    }

    #[test]
    fn test_normalized_serializes_flat() {
        let result = NormalizedResult::failure("Tool not found");
        let value: Value = serde_json::from_str(&result.to_message_content()).unwrap();
        assert_eq!(value, json!({"success": false, "error": "Tool not found"}));

        let with_meta = NormalizedResult::success(json!([])).with_metadata("query", json!("SELECT 1"));
        let value: Value = serde_json::from_str(&with_meta.to_message_content()).unwrap();
        assert_eq!(value["query"], "SELECT 1");
    }

    #[test]
    fn test_chat_message_constructors() {
        let msg = ChatMessage::tool("call_1", "{}");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));

        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, json!({"role": "user", "content": "hi"}));
    }
}
