//! Provider registry and tool discovery.
//!
//! The registry owns the canonical routing cache for one orchestrator. It is
//! filled by [`ProviderRegistry::refresh`] and emptied by
//! [`ProviderRegistry::invalidate`]; lookups never fall back to anything else.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use toolrelay_core::{
    CollisionPolicy, CoreError, ProviderDescriptor, Route, RoutingTable, ToolCollision,
    ToolDescriptor,
};
use toolrelay_mcp::ProviderTransport;
use tracing::{debug, info, warn};

use crate::error::AgentResult;

/// A provider left out of a discovery pass, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderFailure {
    pub provider_id: String,
    pub error: String,
}

/// Outcome of one full discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveryReport {
    pub providers: Vec<ProviderDescriptor>,
    pub tools: Vec<ToolDescriptor>,
    pub collisions: Vec<ToolCollision>,
    pub failures: Vec<ProviderFailure>,
}

#[derive(Default)]
struct RegistryState {
    loaded: bool,
    providers: Vec<ProviderDescriptor>,
    tools: Vec<ToolDescriptor>,
    table: RoutingTable,
}

pub struct ProviderRegistry {
    configured: Vec<ProviderDescriptor>,
    transport: Arc<ProviderTransport>,
    collision_policy: CollisionPolicy,
    state: RwLock<RegistryState>,
}

impl ProviderRegistry {
    pub fn new(configured: Vec<ProviderDescriptor>, transport: Arc<ProviderTransport>) -> Self {
        Self {
            configured,
            transport,
            collision_policy: CollisionPolicy::default(),
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    pub fn configured(&self) -> &[ProviderDescriptor] {
        &self.configured
    }

    pub fn transport(&self) -> &Arc<ProviderTransport> {
        &self.transport
    }

    /// Handshake with every enabled provider; unreachable ones are excluded.
    pub async fn discover_providers(&self) -> Vec<ProviderDescriptor> {
        self.discover().await.0
    }

    /// Tools of every reachable provider, tagged with the provider id.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let (providers, _) = self.discover().await;
        self.collect_tools(&providers).await.0
    }

    /// Run a full discovery pass and replace the routing cache.
    ///
    /// Fails only when the collision policy rejects the tool set; the
    /// previous cache is left untouched in that case.
    pub async fn refresh(&self) -> AgentResult<DiscoveryReport> {
        let (providers, mut failures) = self.discover().await;
        let (tools, list_failures) = self.collect_tools(&providers).await;
        failures.extend(list_failures);

        let table = RoutingTable::build(&providers, &tools, self.collision_policy)?;
        let collisions = table.collisions().to_vec();
        let tools = routed_tools(&table, tools);

        info!(
            providers = providers.len(),
            tools = tools.len(),
            collisions = collisions.len(),
            failures = failures.len(),
            "Provider discovery complete"
        );

        let mut state = self.state.write().await;
        state.loaded = true;
        state.providers = providers.clone();
        state.tools = tools.clone();
        state.table = table;

        Ok(DiscoveryReport {
            providers,
            tools,
            collisions,
            failures,
        })
    }

    /// Refresh only if nothing is cached yet.
    pub async fn ensure_loaded(&self) -> AgentResult<()> {
        if self.state.read().await.loaded {
            return Ok(());
        }
        self.refresh().await.map(|_| ())
    }

    /// Route for `tool_name` from the cache. `Unresolved` when not cached.
    pub async fn resolve(&self, tool_name: &str) -> Route {
        self.state.read().await.table.resolve(tool_name)
    }

    pub async fn providers(&self) -> Vec<ProviderDescriptor> {
        self.state.read().await.providers.clone()
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.state.read().await.tools.clone()
    }

    pub async fn collisions(&self) -> Vec<ToolCollision> {
        self.state.read().await.table.collisions().to_vec()
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }

    /// Drop the routing cache and every provider handle.
    pub async fn invalidate(&self) {
        *self.state.write().await = RegistryState::default();
        self.transport.clear().await;
        debug!("Provider registry invalidated");
    }

    async fn discover(&self) -> (Vec<ProviderDescriptor>, Vec<ProviderFailure>) {
        let enabled: Vec<&ProviderDescriptor> = self
            .configured
            .iter()
            .filter(|p| {
                if !p.enabled {
                    debug!(provider_id = %p.id, "Skipping disabled provider");
                }
                p.enabled
            })
            .collect();

        let outcomes = join_all(enabled.iter().map(|p| self.transport.connect(p))).await;

        let mut providers = Vec::new();
        let mut failures = Vec::new();
        for (provider, outcome) in enabled.into_iter().zip(outcomes) {
            match outcome {
                Ok(info) => {
                    debug!(
                        provider_id = %provider.id,
                        server = %info.name,
                        version = %info.version,
                        "Provider reachable"
                    );
                    providers.push(provider.clone());
                }
                Err(e) => {
                    let failure = e.into_discovery_failure(&provider.id);
                    warn!(
                        provider_id = %provider.id,
                        error_code = failure.error_code(),
                        error = %failure,
                        "Provider unreachable, excluded from discovery"
                    );
                    failures.push(ProviderFailure {
                        provider_id: provider.id.clone(),
                        error: failure_message(&failure),
                    });
                }
            }
        }
        (providers, failures)
    }

    async fn collect_tools(
        &self,
        providers: &[ProviderDescriptor],
    ) -> (Vec<ToolDescriptor>, Vec<ProviderFailure>) {
        let outcomes = join_all(providers.iter().map(|p| self.transport.list_tools(p))).await;

        let mut tools = Vec::new();
        let mut failures = Vec::new();
        for (provider, outcome) in providers.iter().zip(outcomes) {
            match outcome {
                Ok(listed) => {
                    debug!(provider_id = %provider.id, tools = listed.len(), "Tools listed");
                    tools.extend(listed);
                }
                Err(e) => {
                    warn!(
                        provider_id = %provider.id,
                        error = %e,
                        "Failed to list tools, skipping provider"
                    );
                    failures.push(ProviderFailure {
                        provider_id: provider.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        (tools, failures)
    }
}

/// Declarations the table routes to, one per tool name. Losers of a name
/// collision are dropped so every listed tool is the one a call reaches.
fn routed_tools(table: &RoutingTable, tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
    let mut seen = HashSet::new();
    tools
        .into_iter()
        .filter(|t| {
            table
                .resolve(&t.name)
                .provider()
                .is_some_and(|p| p.id == t.provider_id)
        })
        .filter(|t| seen.insert(t.name.clone()))
        .collect()
}

fn failure_message(error: &CoreError) -> String {
    match error {
        CoreError::DiscoveryFailure { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
