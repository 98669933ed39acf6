//! # Orchestrator Test Harness
//!
//! Wires an [`Orchestrator`] to mock providers and a mock engine so a test
//! only has to describe the providers and the engine's script.

use std::sync::Arc;
use toolrelay_agent::{
    AgentResult, ExecutionMode, Orchestrator, ProcessOutcome, ProviderRegistry,
};
use toolrelay_core::{AccessContext, AccessPolicy, CollisionPolicy, RetryPolicy};
use toolrelay_mcp::{ProviderTransport, ToolProviderClient};

use crate::mock_engine::MockReasoningEngine;
use crate::mock_providers::{MockConnector, MockProvider};

pub const TEST_SYSTEM_PROMPT: &str = "You are a test assistant.";

pub struct OrchestratorHarness {
    pub orchestrator: Orchestrator,
    pub engine: MockReasoningEngine,
    pub connector: MockConnector,
}

impl OrchestratorHarness {
    pub fn builder() -> OrchestratorHarnessBuilder {
        OrchestratorHarnessBuilder::new()
    }

    /// Run `query` as `access` with the configured round budget.
    pub async fn ask(&self, query: &str, access: &AccessContext) -> ProcessOutcome {
        self.orchestrator.process(query, access, &[], None).await
    }

    /// Run `query` with an explicit round budget.
    pub async fn ask_with_rounds(
        &self,
        query: &str,
        access: &AccessContext,
        max_rounds: usize,
    ) -> ProcessOutcome {
        self.orchestrator
            .process(query, access, &[], Some(max_rounds))
            .await
    }
}

pub struct OrchestratorHarnessBuilder {
    connector: MockConnector,
    engine: MockReasoningEngine,
    policy: AccessPolicy,
    collision_policy: CollisionPolicy,
    execution_mode: ExecutionMode,
    max_rounds: usize,
}

impl Default for OrchestratorHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorHarnessBuilder {
    pub fn new() -> Self {
        Self {
            connector: MockConnector::new(),
            engine: MockReasoningEngine::answering("done"),
            policy: AccessPolicy::allow_all(),
            collision_policy: CollisionPolicy::default(),
            execution_mode: ExecutionMode::default(),
            max_rounds: 30,
        }
    }

    pub fn with_provider(mut self, provider: MockProvider) -> Self {
        self.connector = self.connector.with_provider(provider);
        self
    }

    pub fn with_client(
        mut self,
        provider_id: impl Into<String>,
        client: Arc<dyn ToolProviderClient>,
    ) -> Self {
        self.connector = self.connector.with_client(provider_id, client);
        self
    }

    pub fn with_unreachable(mut self, provider_id: impl Into<String>) -> Self {
        self.connector = self.connector.with_unreachable(provider_id);
        self
    }

    pub fn with_engine(mut self, engine: MockReasoningEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_access_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn build(self) -> AgentResult<OrchestratorHarness> {
        let transport = ProviderTransport::new(Arc::new(self.connector.clone()))
            .with_retry_policy(RetryPolicy::none());
        let registry = ProviderRegistry::new(self.connector.descriptors(), Arc::new(transport))
            .with_collision_policy(self.collision_policy);

        let orchestrator = Orchestrator::builder()
            .registry(Arc::new(registry))
            .engine(Arc::new(self.engine.clone()))
            .system_prompt(TEST_SYSTEM_PROMPT)
            .access_policy(self.policy)
            .execution_mode(self.execution_mode)
            .max_rounds(self.max_rounds)
            .build()?;

        Ok(OrchestratorHarness {
            orchestrator,
            engine: self.engine,
            connector: self.connector,
        })
    }
}
