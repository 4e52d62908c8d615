//! Peer federation scenarios: an in-process peer served through the HTTP
//! API, and teardown while a request is in flight.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use gadgetd::config::Config;
use gadgetd::peer::PeerClient;
use gadgetd::protocol::{
    ClientCapabilities, JsonRpcMessage, JsonRpcResponse, PROTOCOL_VERSION,
};
use gadgetd::server::{AppState, Server, create_router};
use gadgetd::transport::{InProcTransport, Transport};

/// Spawn a minimal in-process MCP peer: `initialize` plus an `echo` tool
/// that returns its arguments as text.
fn spawn_echo_peer(transport: Arc<InProcTransport>) {
    tokio::spawn(async move {
        while let Ok(message) = transport.receive().await {
            let JsonRpcMessage::Request(request) = message else {
                continue;
            };
            let response = match request.method.as_str() {
                "initialize" => JsonRpcResponse::success(
                    request.id,
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {"tools": {"listChanged": false}},
                        "serverInfo": {"name": "echo-peer", "version": "1.0.0"}
                    }),
                ),
                "tools/list" => JsonRpcResponse::success(
                    request.id,
                    json!({"tools": [{
                        "name": "echo",
                        "description": "returns its arguments as text",
                        "inputSchema": {"type": "object"}
                    }]}),
                ),
                "tools/call" => {
                    let arguments = request
                        .params
                        .as_ref()
                        .and_then(|p| p.get("arguments"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    JsonRpcResponse::success(
                        request.id,
                        json!({"content": [{"type": "text", "text": arguments.to_string()}]}),
                    )
                }
                _ => JsonRpcResponse::error(Some(request.id), -32601, "Method not found"),
            };
            if transport
                .send(&JsonRpcMessage::Response(response))
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

async fn ready_echo_client(name: &str, timeout: Option<Duration>) -> Arc<PeerClient> {
    let (ours, theirs) = InProcTransport::pair();
    spawn_echo_peer(theirs);
    let client = PeerClient::new(name, ours, ClientCapabilities::default(), timeout);
    client.connect().await.unwrap();
    client
}

fn test_state(dir: &Path) -> Arc<AppState> {
    let mut config = Config::default();
    config.auth.secret = Some("peer-test-secret".to_string());
    config.rbac.store_path = dir.join("policy.json");
    Server::build_state(&config).unwrap()
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"username": username, "password": password}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    body["token"].as_str().unwrap().to_string()
}

// ── scenario 5: peer tool call through the HTTP API ──────────────────

#[tokio::test]
async fn tool_call_against_in_process_peer() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    // GIVEN: a ready in-process peer installed in the manager
    let client = ready_echo_client("echo-peer", None).await;
    state.peers.install(client);

    let app = create_router(Arc::clone(&state));
    let token = login(&app, "user", "user123").await;

    // WHEN: the tool is called over HTTP
    let request = Request::builder()
        .method("POST")
        .uri("/api/mcp/tools/echo-peer/echo")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(json!({"x": 1}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    // THEN: the arguments come back as text content
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["content"][0]["text"].as_str().unwrap().contains("\"x\":1"));
}

#[tokio::test]
async fn peer_routes_require_ai_access_permission() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    let app = create_router(Arc::clone(&state));

    // readonly lacks (ai, access)
    let token = login(&app, "readonly", "readonly123").await;
    let request = Request::builder()
        .method("GET")
        .uri("/api/mcp/servers")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn installed_peer_appears_in_server_listing_and_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    let client = ready_echo_client("echo-peer", None).await;
    state.peers.install(client);

    let app = create_router(Arc::clone(&state));
    let token = login(&app, "user", "user123").await;

    let request = Request::builder()
        .method("GET")
        .uri("/api/mcp/servers")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let servers = body["servers"].as_array().unwrap();
    assert!(servers.iter().any(|s| s["name"] == "echo-peer" && s["ready"] == true));

    // Aggregated tool catalog includes the peer's echo tool
    let request = Request::builder()
        .method("GET")
        .uri("/api/mcp/tools")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["tools"]["echo-peer"][0]["name"], "echo");
}

// ── scenario 6: peer disconnect during a request ─────────────────────

#[tokio::test]
async fn close_during_in_flight_request_releases_the_caller() {
    // GIVEN: a peer that answers initialize but goes silent afterwards
    let (ours, theirs) = InProcTransport::pair();
    tokio::spawn(async move {
        while let Ok(message) = theirs.receive().await {
            if let JsonRpcMessage::Request(request) = message {
                if request.method == "initialize" {
                    let response = JsonRpcResponse::success(
                        request.id,
                        json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "capabilities": {},
                            "serverInfo": {"name": "silent-peer", "version": "0.1.0"}
                        }),
                    );
                    let _ = theirs.send(&JsonRpcMessage::Response(response)).await;
                }
            }
        }
    });
    let client = PeerClient::new(
        "silent-peer",
        ours,
        ClientCapabilities::default(),
        Some(Duration::from_secs(30)),
    );
    client.connect().await.unwrap();

    // WHEN: a call is in flight and the peer session closes
    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call_tool("echo", json!({"x": 1})).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await;

    // THEN: the caller observes a well-defined error well inside the
    // 30-second bound and the pending table is empty
    let outcome = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("caller must be released promptly")
        .unwrap();
    assert!(outcome.is_err());
    assert_eq!(client.pending_len(), 0);
    assert!(!client.is_ready());
}

// ── manager-level aggregation resilience ─────────────────────────────

#[tokio::test]
async fn aggregation_omits_failing_peers() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    // One healthy peer, one whose transport dies right after the handshake
    let healthy = ready_echo_client("healthy", None).await;
    state.peers.install(healthy);

    let dying = ready_echo_client("dying", Some(Duration::from_millis(300))).await;
    dying.close().await;
    state.peers.install(Arc::clone(&dying));

    let tools = state.peers.list_tools().await;
    assert!(tools.contains_key("healthy"));
    assert!(!tools.contains_key("dying"));
    assert_eq!(tools.len(), 1);
}
