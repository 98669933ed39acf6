//! Tool name to provider routing.
//!
//! One canonical table built from a discovery pass. Lookups never fall back
//! to scanning providers: a name that is not in the table is
//! [`Route::Unresolved`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::types::{ProviderDescriptor, ToolDescriptor};

/// What to do when two providers declare the same tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// The provider discovered later wins
    #[default]
    LastWins,
    /// The provider discovered first keeps the name
    FirstWins,
    /// Refuse to build the table
    Reject,
}

impl std::str::FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "last_wins" | "last" => Ok(CollisionPolicy::LastWins),
            "first_wins" | "first" => Ok(CollisionPolicy::FirstWins),
            "reject" => Ok(CollisionPolicy::Reject),
            other => Err(format!(
                "unknown collision policy '{other}', expected last_wins/first_wins/reject"
            )),
        }
    }
}

/// A tool name declared by more than one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCollision {
    pub tool: String,
    /// Provider that owns the name after the policy was applied
    pub kept: String,
    /// Provider whose declaration was dropped
    pub dropped: String,
}

/// Result of resolving a tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Provider(ProviderDescriptor),
    Unresolved,
}

impl Route {
    pub fn provider(&self) -> Option<&ProviderDescriptor> {
        match self {
            Route::Provider(p) => Some(p),
            Route::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Route::Provider(_))
    }
}

/// Tool name to owning provider, rebuilt on each discovery pass.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<String, ProviderDescriptor>,
    collisions: Vec<ToolCollision>,
}

impl RoutingTable {
    /// Build from the tools of one discovery pass.
    ///
    /// `tools` must be in discovery order; that order decides first/last for
    /// the collision policy. Tools whose provider is not in `providers` are
    /// ignored.
    pub fn build(
        providers: &[ProviderDescriptor],
        tools: &[ToolDescriptor],
        policy: CollisionPolicy,
    ) -> CoreResult<Self> {
        let by_id: HashMap<&str, &ProviderDescriptor> =
            providers.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut table = Self::default();
        for tool in tools {
            let Some(provider) = by_id.get(tool.provider_id.as_str()) else {
                continue;
            };

            let Some(existing) = table.routes.get(&tool.name) else {
                table
                    .routes
                    .insert(tool.name.clone(), (*provider).clone());
                continue;
            };

            if existing.id == provider.id {
                continue;
            }

            let collision = match policy {
                CollisionPolicy::Reject => {
                    return Err(CoreError::ToolNameCollision {
                        tool: tool.name.clone(),
                        first: existing.id.clone(),
                        second: provider.id.clone(),
                    });
                }
                CollisionPolicy::FirstWins => ToolCollision {
                    tool: tool.name.clone(),
                    kept: existing.id.clone(),
                    dropped: provider.id.clone(),
                },
                CollisionPolicy::LastWins => {
                    let collision = ToolCollision {
                        tool: tool.name.clone(),
                        kept: provider.id.clone(),
                        dropped: existing.id.clone(),
                    };
                    table
                        .routes
                        .insert(tool.name.clone(), (*provider).clone());
                    collision
                }
            };

            warn!(
                tool = %collision.tool,
                kept = %collision.kept,
                dropped = %collision.dropped,
                "Tool name declared by multiple providers"
            );
            table.collisions.push(collision);
        }

        Ok(table)
    }

    pub fn resolve(&self, tool_name: &str) -> Route {
        match self.routes.get(tool_name) {
            Some(provider) => Route::Provider(provider.clone()),
            None => Route::Unresolved,
        }
    }

    pub fn collisions(&self) -> &[ToolCollision] {
        &self.collisions
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}
