//! Access Policy Filter
//!
//! Narrows the discovered tool set to what a caller's roles may use.
//!
//! A tool is visible when:
//! 1. every restriction matching it (including the tool's own
//!    `allowed_roles`) names at least one of the caller's roles, and
//! 2. a grant for one of the caller's roles lists the tool or its provider,
//!    or a matching restriction explicitly named the caller's role, or the
//!    policy's [`UnlistedAccess`] is `Allow`.
//!
//! Patterns support `*` (everything) and a trailing `*` prefix match.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{CoreError, CoreResult};
use crate::types::ToolDescriptor;

/// Decision for tools no grant or restriction mentions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlistedAccess {
    #[default]
    Deny,
    Allow,
}

/// Providers and tools granted to one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    /// Provider id patterns; granting a provider grants all its tools
    #[serde(default)]
    pub providers: Vec<String>,
    /// Tool name patterns
    #[serde(default)]
    pub tools: Vec<String>,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            providers: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_provider(mut self, pattern: impl Into<String>) -> Self {
        self.providers.push(pattern.into());
        self
    }

    pub fn with_tool(mut self, pattern: impl Into<String>) -> Self {
        self.tools.push(pattern.into());
        self
    }

    fn covers(&self, tool: &ToolDescriptor) -> bool {
        self.tools.iter().any(|p| pattern_matches(p, &tool.name))
            || self
                .providers
                .iter()
                .any(|p| pattern_matches(p, &tool.provider_id))
    }
}

/// Tools matching `tool_pattern` require one of `allowed_roles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRestriction {
    pub tool_pattern: String,
    pub allowed_roles: Vec<String>,
}

impl ToolRestriction {
    pub fn new(tool_pattern: impl Into<String>) -> Self {
        Self {
            tool_pattern: tool_pattern.into(),
            allowed_roles: Vec::new(),
        }
    }

    pub fn allow_role(mut self, role: impl Into<String>) -> Self {
        self.allowed_roles.push(role.into());
        self
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        pattern_matches(&self.tool_pattern, tool_name)
    }
}

/// Role-keyed access policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default)]
    pub roles: Vec<RoleGrant>,
    #[serde(default)]
    pub restrictions: Vec<ToolRestriction>,
    #[serde(default)]
    pub unlisted: UnlistedAccess,
}

impl AccessPolicy {
    /// Empty policy; denies everything not granted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy used when no policy is configured. Only per-tool
    /// `allowed_roles` still apply.
    pub fn allow_all() -> Self {
        Self {
            unlisted: UnlistedAccess::Allow,
            ..Self::default()
        }
    }

    pub fn with_grant(mut self, grant: RoleGrant) -> Self {
        self.roles.push(grant);
        self
    }

    pub fn with_restriction(mut self, restriction: ToolRestriction) -> Self {
        self.restrictions.push(restriction);
        self
    }

    pub fn with_unlisted(mut self, unlisted: UnlistedAccess) -> Self {
        self.unlisted = unlisted;
        self
    }

    pub fn from_toml_str(source: &str) -> CoreResult<Self> {
        toml::from_str(source).map_err(|e| CoreError::InvalidPolicy(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| CoreError::InvalidPolicy(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    pub fn is_tool_visible(&self, roles: &BTreeSet<String>, tool: &ToolDescriptor) -> bool {
        let has_any = |allowed: &[String]| allowed.iter().any(|r| roles.contains(r));

        let mut explicitly_named = false;
        if !tool.allowed_roles.is_empty() {
            if !has_any(&tool.allowed_roles) {
                return false;
            }
            explicitly_named = true;
        }
        for restriction in self.restrictions.iter().filter(|r| r.matches(&tool.name)) {
            if !has_any(&restriction.allowed_roles) {
                return false;
            }
            explicitly_named = true;
        }

        let granted = self
            .roles
            .iter()
            .filter(|g| roles.contains(&g.role))
            .any(|g| g.covers(tool));

        granted || explicitly_named || self.unlisted == UnlistedAccess::Allow
    }

    /// The subset of `tools` visible to `roles`, in input order.
    pub fn visible_tools(
        &self,
        roles: &BTreeSet<String>,
        tools: &[ToolDescriptor],
    ) -> Vec<ToolDescriptor> {
        tools
            .iter()
            .filter(|t| self.is_tool_visible(roles, t))
            .cloned()
            .collect()
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }

    pattern == name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn catalog() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("search_accounts", "crm"),
            ToolDescriptor::new("update_account", "crm"),
            ToolDescriptor::new("run_query", "sql"),
            ToolDescriptor::new("drop_table", "sql"),
        ]
    }

    fn names(tools: &[ToolDescriptor]) -> Vec<&str> {
        tools.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_grant_by_provider_and_tool() {
        let policy = AccessPolicy::new()
            .with_grant(RoleGrant::new("analyst").with_provider("sql"))
            .with_grant(RoleGrant::new("sales").with_tool("search_*"));

        let visible = policy.visible_tools(&roles(&["analyst"]), &catalog());
        assert_eq!(names(&visible), vec!["run_query", "drop_table"]);

        let visible = policy.visible_tools(&roles(&["sales", "analyst"]), &catalog());
        assert_eq!(
            names(&visible),
            vec!["search_accounts", "run_query", "drop_table"]
        );
    }

    #[test]
    fn test_unlisted_deny_by_default() {
        let policy = AccessPolicy::new();
        assert!(policy.visible_tools(&roles(&["anyone"]), &catalog()).is_empty());
    }

    #[test]
    fn test_unlisted_allow() {
        let policy = AccessPolicy::new().with_unlisted(UnlistedAccess::Allow);
        assert_eq!(policy.visible_tools(&roles(&[]), &catalog()).len(), 4);
    }

    #[test]
    fn test_restriction_overrides_grant() {
        let policy = AccessPolicy::new()
            .with_grant(RoleGrant::new("analyst").with_provider("sql"))
            .with_restriction(ToolRestriction::new("drop_*").allow_role("admin"));

        let visible = policy.visible_tools(&roles(&["analyst"]), &catalog());
        assert_eq!(names(&visible), vec!["run_query"]);

        let visible = policy.visible_tools(&roles(&["analyst", "admin"]), &catalog());
        assert_eq!(names(&visible), vec!["run_query", "drop_table"]);
    }

    #[test]
    fn test_restriction_names_role_explicitly() {
        let policy = AccessPolicy::new()
            .with_restriction(ToolRestriction::new("update_account").allow_role("manager"));
        let visible = policy.visible_tools(&roles(&["manager"]), &catalog());
        assert_eq!(names(&visible), vec!["update_account"]);
    }

    #[test]
    fn test_tool_allowed_roles_apply_under_allow_all() {
        let tools = vec![
            ToolDescriptor::new("open", "crm"),
            ToolDescriptor::new("secret", "crm").with_allowed_role("admin"),
        ];
        let policy = AccessPolicy::allow_all();

        assert_eq!(names(&policy.visible_tools(&roles(&["viewer"]), &tools)), vec!["open"]);
        assert_eq!(policy.visible_tools(&roles(&["admin"]), &tools).len(), 2);
    }

    #[test]
    fn test_from_toml() {
        let policy = AccessPolicy::from_toml_str(
            r#"
            unlisted = "deny"

            [[roles]]
            role = "analyst"
            providers = ["sql"]

            [[roles]]
            role = "sales"
            tools = ["search_accounts"]

            [[restrictions]]
            tool_pattern = "drop_*"
            allowed_roles = ["admin"]
            "#,
        )
        .unwrap();

        assert_eq!(policy.roles.len(), 2);
        assert_eq!(policy.unlisted, UnlistedAccess::Deny);
        let visible = policy.visible_tools(&roles(&["analyst"]), &catalog());
        assert_eq!(names(&visible), vec!["run_query"]);
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = AccessPolicy::from_toml_str("unlisted = 42").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_POLICY");
    }

    #[rstest::rstest]
    #[case("*", "anything", true)]
    #[case("search_*", "search_accounts", true)]
    #[case("search_*", "run_query", false)]
    #[case("run_query", "run_query", true)]
    #[case("run_query", "run_query_v2", false)]
    fn test_pattern_matching(#[case] pattern: &str, #[case] name: &str, #[case] expected: bool) {
        assert_eq!(pattern_matches(pattern, name), expected);
    }
}
