//! End-to-end tests for the dynamic output-directory subsystem
//!
//! Drives the full stack through the public surface: JSON-RPC requests into
//! `McpServer`, roots announcements through the validation pipeline, and the
//! file writer consuming the resulting configuration.

use qrforge_mcp::config::{ConfigProvider, ConfigSource};
use qrforge_mcp::protocol::{methods, JsonRpcRequest, RequestId, JSONRPC_VERSION, MCP_PROTOCOL_VERSION};
use qrforge_mcp::security::{PathSecurityValidator, RateLimiter, SecurityPolicy};
use qrforge_mcp::writer::{QrEncoder, QrFileWriter, WriteError};
use qrforge_mcp::{McpServer, McpServerConfig, RootsManager};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn request(method: &str, id: i64, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(RequestId::Number(id)),
        method: method.to_string(),
        params,
    }
}

fn notification(method: &str, params: Value) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: None,
        method: method.to_string(),
        params: Some(params),
    }
}

fn initialize(server: &mut McpServer) {
    let response = server.handle_request(request(
        methods::INITIALIZE,
        1,
        Some(json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "e2e", "version": "0.0.0"}
        })),
    ));
    assert!(response.error.is_none(), "initialize failed");
}

/// Unwrap the JSON payload a tool call returned in its first content block
fn tool_payload(response: &qrforge_mcp::JsonRpcResponse) -> Value {
    let result = response.result.as_ref().expect("tool call had no result");
    // `isError` is omitted when false
    assert_ne!(result["isError"], json!(true), "tool reported an error");
    let text = result["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

#[test]
fn full_session_with_whitelist() {
    let temp = TempDir::new().unwrap();
    let allowed = temp.path().join("allowed");

    let mut server = McpServer::new(McpServerConfig {
        default_directory: temp.path().join("default"),
        policy: SecurityPolicy {
            whitelisted_directories: vec![allowed.clone()],
            ..SecurityPolicy::default()
        },
        ..McpServerConfig::default()
    })
    .unwrap();
    initialize(&mut server);

    // Boot state: the compiled-in default wins when no other source is set
    let response = server.handle_request(request(
        methods::TOOLS_CALL,
        2,
        Some(json!({"name": "get_directory_info", "arguments": {}})),
    ));
    let info = tool_payload(&response);
    assert_eq!(info["source"], json!("default"));
    assert_eq!(
        info["path"],
        json!(temp.path().join("default").display().to_string())
    );

    // Whitelisted announcement is applied
    server.handle_request(notification(
        methods::ROOTS_LIST_CHANGED,
        json!({"roots": [{"uri": format!("file://{}", allowed.join("qr").display())}]}),
    ));
    assert_eq!(
        server.manager().provider().get_current_directory(),
        allowed.join("qr")
    );

    // A traversal attempt is rejected and the directory stays put
    server.manager().validator().reset_rate_limits();
    server.handle_request(notification(
        methods::ROOTS_LIST_CHANGED,
        json!({"roots": [{"uri": format!("file://{}/../../escape", allowed.display())}]}),
    ));
    assert_eq!(
        server.manager().provider().get_current_directory(),
        allowed.join("qr")
    );

    // So is a path outside the whitelist, including the sibling-prefix trap
    server.manager().validator().reset_rate_limits();
    let sibling = format!("{}extra", allowed.display());
    server.handle_request(notification(
        methods::ROOTS_LIST_CHANGED,
        json!({"roots": [{"uri": format!("file://{}", sibling)}]}),
    ));
    assert_eq!(
        server.manager().provider().get_current_directory(),
        allowed.join("qr")
    );

    // The diagnostic surface reflects the external source
    let response = server.handle_request(request(
        methods::TOOLS_CALL,
        3,
        Some(json!({"name": "get_directory_info", "arguments": {}})),
    ));
    let info = tool_payload(&response);
    assert_eq!(info["source"], json!("external_roots"));

    let response = server.handle_request(request(
        methods::TOOLS_CALL,
        4,
        Some(json!({"name": "list_allowed_directories", "arguments": {}})),
    ));
    let listing = tool_payload(&response);
    assert_eq!(listing["whitelist_enforced"], json!(true));
    assert_eq!(
        listing["whitelisted_directories"],
        json!([allowed.display().to_string()])
    );
}

#[test]
fn precedence_and_reset_across_the_stack() {
    let temp = TempDir::new().unwrap();
    let mut server = McpServer::new(McpServerConfig {
        default_directory: temp.path().join("default"),
        environment_directory: Some(PathBuf::from("/from/env")),
        command_line_directory: Some(PathBuf::from("/from/cmdline")),
        ..McpServerConfig::default()
    })
    .unwrap();
    initialize(&mut server);

    // ENVIRONMENT beats COMMAND_LINE at boot
    let provider = Arc::clone(server.manager().provider());
    assert_eq!(provider.get_current_directory(), PathBuf::from("/from/env"));
    assert_eq!(provider.status().source, ConfigSource::Environment);

    // EXTERNAL_ROOTS beats everything
    server.handle_request(notification(
        methods::ROOTS_LIST_CHANGED,
        json!({"roots": [{"uri": "file:///from/peer"}]}),
    ));
    assert_eq!(provider.get_current_directory(), PathBuf::from("/from/peer"));
    assert_eq!(provider.status().source, ConfigSource::ExternalRoots);

    // Reset drops the external source and falls back down the chain
    let reset = server.manager().reset_to_defaults();
    assert!(reset.success);
    assert_eq!(provider.get_current_directory(), PathBuf::from("/from/env"));
    assert_eq!(provider.status().source, ConfigSource::Environment);
}

#[test]
fn rate_limit_protects_the_full_notification_path() {
    let temp = TempDir::new().unwrap();
    let mut server = McpServer::new(McpServerConfig {
        default_directory: temp.path().join("default"),
        ..McpServerConfig::default()
    })
    .unwrap();
    initialize(&mut server);

    // Default limiter admits one change per window; the burst after it must
    // not move the directory
    for i in 0..4 {
        server.handle_request(notification(
            methods::ROOTS_LIST_CHANGED,
            json!({"roots": [{"uri": format!("file:///var/tmp/qr-burst-{}", i)}]}),
        ));
    }
    assert_eq!(
        server.manager().provider().get_current_directory(),
        PathBuf::from("/var/tmp/qr-burst-0")
    );
}

#[test]
fn first_valid_candidate_wins_through_the_manager() {
    let temp = TempDir::new().unwrap();
    let validator = Arc::new(PathSecurityValidator::with_rate_limiter(
        SecurityPolicy::default(),
        RateLimiter::new(1000, Duration::from_secs(1)),
    ));
    let provider = Arc::new(ConfigProvider::new(temp.path().join("default")));
    let manager = RootsManager::new(validator, provider);
    manager.initialize();

    let result = manager.handle_roots_changed(&[
        "/x/%2e%2e%2f".to_string(),
        temp.path().join("a").display().to_string(),
        temp.path().join("b").display().to_string(),
    ]);

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        result.updated_roots,
        vec![temp.path().join("a").display().to_string()]
    );
    assert_eq!(
        manager.provider().get_current_directory(),
        temp.path().join("a")
    );
}

struct StubEncoder;

impl QrEncoder for StubEncoder {
    fn encode(&self, data: &str) -> Result<Vec<u8>, WriteError> {
        Ok(data.as_bytes().to_vec())
    }
}

#[test]
fn writer_follows_roots_announcements() {
    let temp = TempDir::new().unwrap();
    let mut server = McpServer::new(McpServerConfig {
        default_directory: temp.path().join("default"),
        ..McpServerConfig::default()
    })
    .unwrap();
    initialize(&mut server);

    let writer = QrFileWriter::new(
        Arc::clone(server.manager().provider()),
        Box::new(StubEncoder),
    );

    let before = writer.write("wc:one").unwrap();
    assert!(before.starts_with(temp.path().join("default")));

    let moved = temp.path().join("peer-selected");
    server.handle_request(notification(
        methods::ROOTS_LIST_CHANGED,
        json!({"roots": [{"uri": format!("file://{}", moved.display())}]}),
    ));

    let after = writer.write("wc:two").unwrap();
    assert!(after.starts_with(&moved));
    assert_eq!(std::fs::read(&after).unwrap(), b"wc:two");
}

#[test]
fn shutdown_leaves_reads_total_and_rejects_changes() {
    let temp = TempDir::new().unwrap();
    let mut server = McpServer::new(McpServerConfig {
        default_directory: temp.path().join("default"),
        ..McpServerConfig::default()
    })
    .unwrap();
    initialize(&mut server);

    server.handle_request(notification(
        methods::ROOTS_LIST_CHANGED,
        json!({"roots": [{"uri": "file:///var/tmp/qr-last"}]}),
    ));
    server.manager().shutdown();

    // Reads stay total after shutdown; mutation fails fast
    assert_eq!(
        server.manager().provider().get_current_directory(),
        PathBuf::from("/var/tmp/qr-last")
    );
    let result = server
        .manager()
        .handle_roots_changed(&["/var/tmp/too-late".to_string()]);
    assert!(!result.success);
}
