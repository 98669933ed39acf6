//! HTTP-level tests for the MCP client and transport against a mock server.

use serde_json::json;
use std::sync::Arc;
use toolrelay_core::ProviderDescriptor;
use toolrelay_mcp::{DefaultConnector, HttpMcpClient, McpError, ProviderTransport, ToolProviderClient};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_handshake(server: &MockServer, session: Option<&str>) {
    let mut init = ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "protocolVersion": "2025-03-26",
            "serverInfo": {"name": "crm", "version": "1.0"},
            "capabilities": {"tools": {}}
        }
    }));
    if let Some(session) = session {
        init = init.insert_header("mcp-session-id", session);
    }

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(init)
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_initialize_and_list_tools_with_session() {
    let server = MockServer::start().await;
    mount_handshake(&server, Some("session-123")).await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("mcp-session-id", "session-123"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "tools": [{
                    "name": "search_accounts",
                    "description": "Search CRM accounts",
                    "inputSchema": {"type": "object", "properties": {"name": {"type": "string"}}}
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpMcpClient::new(format!("{}/mcp", server.uri())).unwrap();
    let info = client.initialize().await.unwrap();
    assert_eq!(info.name, "crm");
    assert_eq!(client.session_id().await.as_deref(), Some("session-123"));

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "search_accounts");
}

#[tokio::test]
async fn test_list_tools_follows_cursor() {
    let server = MockServer::start().await;
    mount_handshake(&server, None).await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/list", "params": {"cursor": "page-2"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": {"tools": [{"name": "second"}]}
        })))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {"tools": [{"name": "first"}], "nextCursor": "page-2"}
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = HttpMcpClient::new(format!("{}/mcp", server.uri())).unwrap();
    let names: Vec<String> = client
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[tokio::test]
async fn test_call_tool_over_sse() {
    let server = MockServer::start().await;
    mount_handshake(&server, None).await;

    let sse = concat!(
        "event: message\n",
        "data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"content\":[{\"type\":\"text\",",
        "\"text\":\"{\\\"success\\\": true, \\\"data\\\": [{\\\"id\\\": 7}]}\"}]}}\n",
        "\n"
    );
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": {"name": "search_accounts"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let transport = ProviderTransport::new(Arc::new(DefaultConnector::new()));
    let provider = ProviderDescriptor::http("crm", format!("{}/mcp", server.uri()));

    let result = transport
        .invoke(&provider, "search_accounts", json!({"name": "Acme"}))
        .await;
    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.data, Some(json!([{"id": 7}])));
}

#[tokio::test]
async fn test_json_rpc_error_is_failed_result() {
    let server = MockServer::start().await;
    mount_handshake(&server, None).await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32602, "message": "Unknown tool: nope"}
        })))
        .mount(&server)
        .await;

    let client = HttpMcpClient::new(format!("{}/mcp", server.uri())).unwrap();
    let err = client.call_tool("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::ServerError { code: -32602, .. }));
}

#[tokio::test]
async fn test_service_unavailable_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client = HttpMcpClient::new(format!("{}/mcp", server.uri())).unwrap();
    let err = client.initialize().await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_provider() {
    let client = HttpMcpClient::new("http://127.0.0.1:1/mcp").unwrap();
    let err = client.initialize().await.unwrap_err();
    assert_eq!(err.error_code(), "CONNECTION_ERROR");
}
