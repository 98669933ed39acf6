//! # toolrelay Testing
//!
//! Test doubles for the orchestration engine.
//!
//! ## Components
//!
//! - **[`MockReasoningEngine`]**: scripted completions with request recording
//! - **[`MockProvider`]** / **[`MockConnector`]**: scripted tool providers,
//!   including unreachable ones
//! - **[`MockQueryGenerator`]** / **[`MockQueryExecutor`]**: drive the
//!   self-healing loop
//! - **[`OrchestratorHarness`]**: an orchestrator wired to all of the above
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toolrelay_testing::{MockReasoningEngine, OrchestratorHarness, fixtures};
//!
//! let harness = OrchestratorHarness::builder()
//!     .with_provider(fixtures::crm_provider())
//!     .with_engine(
//!         MockReasoningEngine::new()
//!             .then_call("c1", "search_accounts", r#"{"name": "Acme"}"#)
//!             .then_answer("Acme Corp is owned by Sam."),
//!     )
//!     .build()?;
//!
//! let outcome = harness.ask("Who owns Acme?", &fixtures::sales_user()).await;
//! assert_eq!(outcome.rounds, 2);
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod fixtures;
pub mod mock_engine;
pub mod mock_providers;
pub mod mock_query;
pub mod test_harness;

pub use mock_engine::MockReasoningEngine;
pub use mock_providers::{MockConnector, MockProvider, RecordedCall};
pub use mock_query::{CorrectionCall, MockQueryExecutor, MockQueryGenerator};
pub use test_harness::{OrchestratorHarness, OrchestratorHarnessBuilder, TEST_SYSTEM_PROMPT};

/// Lock a mock's shared state; a test that panicked mid-update still leaves
/// readable data behind.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
