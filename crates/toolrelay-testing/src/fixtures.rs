//! Ready-made callers and providers shared by tests.

use serde_json::json;
use toolrelay_core::{AccessContext, AccessScope};

use crate::mock_providers::MockProvider;

/// CRM provider with `search_accounts` and `get_opportunities`.
pub fn crm_provider() -> MockProvider {
    MockProvider::new("crm")
        .with_tool("search_accounts")
        .with_tool("get_opportunities")
        .with_data(
            "search_accounts",
            json!([{"id": "acc-1", "name": "Acme Corp", "owner_email": "sam@example.com"}]),
        )
        .with_data(
            "get_opportunities",
            json!([{"id": "opp-1", "account_id": "acc-1", "stage": "Negotiation", "amount": 125000}]),
        )
}

/// Documents provider with `search_documents`.
pub fn docs_provider() -> MockProvider {
    MockProvider::new("docs")
        .with_tool("search_documents")
        .with_data(
            "search_documents",
            json!([{"title": "Acme renewal proposal", "score": 0.92}]),
        )
}

pub fn sales_user() -> AccessContext {
    AccessContext::new("u-sales")
        .with_email("sam@example.com")
        .with_role("sales")
        .with_scope(AccessScope {
            owned_only: true,
            ..Default::default()
        })
}

pub fn admin_user() -> AccessContext {
    AccessContext::new("u-admin")
        .with_email("admin@example.com")
        .with_role("admin")
        .with_scope(AccessScope {
            all_accounts: true,
            ..Default::default()
        })
}
