//! MCP Server Implementation
//!
//! JSON-RPC 2.0 server over stdio. A synchronous blocking loop reads requests
//! from stdin and writes responses to stdout; no async runtime is required.
//! The roots/list_changed notification is the one inbound channel through
//! which the peer can influence the output directory, and it is routed
//! through the RootsManager's validation pipeline.

use crate::config::ConfigProvider;
use crate::protocol::{
    methods, ContentBlock, ErrorCode, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, RootsChangedParams, ServerCapabilities, ServerInfo,
    ToolCallParams, ToolCallResult, ToolsCapability, ToolsListResult, JSONRPC_VERSION,
    MCP_PROTOCOL_VERSION,
};
use crate::roots::RootsManager;
use crate::security::{PathSecurityValidator, SecurityPolicy};
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// MCP Server configuration
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Server name (reported in initialize)
    pub server_name: String,

    /// Server version (reported in initialize)
    pub server_version: String,

    /// Compiled-in default output directory (fallback of last resort)
    pub default_directory: PathBuf,

    /// ENVIRONMENT source, read once at startup from QR_DIRECTORY
    pub environment_directory: Option<PathBuf>,

    /// COMMAND_LINE source, parsed once at startup from --qr-dir
    pub command_line_directory: Option<PathBuf>,

    /// Security policy for directory validation
    pub policy: SecurityPolicy,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            server_name: "qrforge-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            default_directory: home.join(".qrforge").join("qr"),
            environment_directory: None,
            command_line_directory: None,
            policy: SecurityPolicy::default(),
        }
    }
}

/// MCP Server
pub struct McpServer {
    config: McpServerConfig,
    manager: Arc<RootsManager>,
    tools: ToolRegistry,
    initialized: bool,
}

impl McpServer {
    /// Create a new MCP server and wire the configuration sources
    pub fn new(config: McpServerConfig) -> Result<Self> {
        let validator = Arc::new(PathSecurityValidator::new(config.policy.clone()));

        let provider = Arc::new(ConfigProvider::new(config.default_directory.clone()));
        provider.set_from_command_line(config.command_line_directory.clone());
        provider.set_from_environment(config.environment_directory.clone());

        let manager = Arc::new(RootsManager::new(validator, provider));
        manager.initialize();

        let tools = ToolRegistry::new();

        Ok(Self {
            config,
            manager,
            tools,
            initialized: false,
        })
    }

    /// The orchestration layer, exposed for embedding and tests
    pub fn manager(&self) -> &Arc<RootsManager> {
        &self.manager
    }

    /// Run the server (blocking, reads from stdin, writes to stdout)
    pub fn run(&mut self) -> Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();

        info!(
            directory = %self.manager.provider().get_current_directory().display(),
            "MCP server starting"
        );

        for line in stdin.lock().lines() {
            let line = line.context("Failed to read from stdin")?;

            if line.trim().is_empty() {
                continue;
            }

            debug!("Received: {}", line);

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(req) => req,
                Err(e) => {
                    let response = JsonRpcResponse::error(
                        None,
                        JsonRpcError::new(ErrorCode::ParseError, format!("Invalid JSON: {}", e)),
                    );
                    self.write_response(&mut stdout, &response)?;
                    continue;
                }
            };

            let response = self.handle_request(request);

            // Notifications get no response
            if response.id.is_none() && response.result.is_none() && response.error.is_none() {
                continue;
            }

            self.write_response(&mut stdout, &response)?;
        }

        info!("MCP server shutting down");
        self.manager.shutdown();
        Ok(())
    }

    fn write_response<W: Write>(&self, out: &mut W, response: &JsonRpcResponse) -> Result<()> {
        let json = serde_json::to_string(response).context("Failed to serialize response")?;
        debug!("Sending: {}", json);
        writeln!(out, "{}", json).context("Failed to write response")?;
        out.flush().context("Failed to flush stdout")?;
        Ok(())
    }

    /// Handle a single JSON-RPC request (synchronous)
    pub fn handle_request(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    ErrorCode::InvalidRequest,
                    format!("Invalid JSON-RPC version: {}", request.jsonrpc),
                ),
            );
        }

        match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request),
            methods::INITIALIZED => {
                if request.id.is_none() {
                    return JsonRpcResponse::skip();
                }
                JsonRpcResponse::success(request.id, Value::Null)
            }
            methods::PING => {
                JsonRpcResponse::success(request.id, Value::Object(Default::default()))
            }
            methods::TOOLS_LIST => self.handle_tools_list(request),
            methods::TOOLS_CALL => self.handle_tools_call(request),
            methods::ROOTS_LIST_CHANGED => {
                self.handle_roots_notification(request.params);
                JsonRpcResponse::skip()
            }
            _ => {
                // Unknown notifications are dropped, not answered
                if request.id.is_none() {
                    debug!("Ignoring unknown notification: {}", request.method);
                    return JsonRpcResponse::skip();
                }
                JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        ErrorCode::MethodNotFound,
                        format!("Unknown method: {}", request.method),
                    ),
                )
            }
        }
    }

    fn handle_initialize(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = match request.params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(
                            ErrorCode::InvalidParams,
                            format!("Invalid initialize params: {}", e),
                        ),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(ErrorCode::InvalidParams, "Missing initialize params"),
                );
            }
        };

        info!(
            "Initialize from {} v{} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );

        self.initialized = true;

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                resources: None,
                prompts: None,
            },
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
        };

        JsonRpcResponse::success(request.id, serde_json::to_value(result).unwrap())
    }

    /// Route a roots announcement into the validation pipeline
    ///
    /// The notification is fire-and-forget: outcomes surface in the logs and
    /// in the audit trail, and the peer can inspect them via the diagnostic
    /// tools.
    fn handle_roots_notification(&self, params: Option<Value>) {
        let params: RootsChangedParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Malformed roots notification ignored: {}", e);
                    return;
                }
            },
            None => {
                debug!("roots notification without params; nothing to apply");
                return;
            }
        };

        let raw_roots: Vec<String> = params
            .roots
            .iter()
            .map(|root| root.as_path_string())
            .collect();

        let result = self.manager.handle_roots_changed(&raw_roots);
        if result.success {
            info!(directory = %result.updated_roots[0], "roots change applied");
        } else {
            warn!(
                rate_limited = result.rate_limited,
                "roots change rejected: {}",
                result.errors.join("; ")
            );
        }
    }

    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.tools.list_tools(),
        };
        JsonRpcResponse::success(request.id, serde_json::to_value(result).unwrap())
    }

    fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if !self.initialized {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(ErrorCode::ServerError(-32002), "Server not initialized"),
            );
        }

        let params: ToolCallParams = match request.params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(
                            ErrorCode::InvalidParams,
                            format!("Invalid tool call params: {}", e),
                        ),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(ErrorCode::InvalidParams, "Missing tool call params"),
                );
            }
        };

        info!("Tool call: {}", params.name);

        let result = self
            .tools
            .call_tool(&params.name, params.arguments, &self.manager);

        let tool_result = match result {
            Ok(value) => match serde_json::to_string(&value) {
                Ok(json) => ToolCallResult {
                    content: vec![ContentBlock::text(json)],
                    is_error: false,
                },
                Err(e) => {
                    error!("Failed to serialize tool result: {}", e);
                    ToolCallResult {
                        content: vec![ContentBlock::text(format!(
                            "Error: failed to serialize tool result: {}",
                            e
                        ))],
                        is_error: true,
                    }
                }
            },
            Err(e) => {
                error!("Tool error: {}", e);
                ToolCallResult {
                    content: vec![ContentBlock::text(format!("Error: {}", e))],
                    is_error: true,
                }
            }
        };

        match serde_json::to_value(tool_result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                error!("Failed to serialize tool response: {}", e);
                JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(ErrorCode::InternalError, "Failed to serialize tool response"),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use tempfile::TempDir;

    fn server(temp: &TempDir) -> McpServer {
        let config = McpServerConfig {
            default_directory: temp.path().join("default"),
            policy: SecurityPolicy {
                forbidden_patterns: Vec::new(),
                ..SecurityPolicy::default()
            },
            ..McpServerConfig::default()
        };
        McpServer::new(config).unwrap()
    }

    fn request(method: &str, id: i64, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(id)),
            method: method.to_string(),
            params,
        }
    }

    fn initialize(server: &mut McpServer) {
        let response = server.handle_request(request(
            methods::INITIALIZE,
            1,
            Some(serde_json::json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0.0.0"}
            })),
        ));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_initialize_reports_server_info() {
        let temp = TempDir::new().unwrap();
        let mut s = server(&temp);

        initialize(&mut s);
        let response = s.handle_request(request(methods::TOOLS_LIST, 2, None));
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert!(result["tools"].as_array().unwrap().len() >= 3);
    }

    #[test]
    fn test_unknown_method() {
        let temp = TempDir::new().unwrap();
        let mut s = server(&temp);

        let response = s.handle_request(request("nonexistent/method", 1, None));
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[test]
    fn test_unknown_notification_gets_no_response() {
        let temp = TempDir::new().unwrap();
        let mut s = server(&temp);

        let notification = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: "notifications/cancelled".to_string(),
            params: None,
        };
        let response = s.handle_request(notification);

        assert!(response.id.is_none() && response.result.is_none() && response.error.is_none());
    }

    #[test]
    fn test_tools_call_requires_initialize() {
        let temp = TempDir::new().unwrap();
        let mut s = server(&temp);

        let response = s.handle_request(request(
            methods::TOOLS_CALL,
            1,
            Some(serde_json::json!({"name": "get_directory_info", "arguments": {}})),
        ));
        assert_eq!(response.error.unwrap().code, -32002);
    }

    #[test]
    fn test_roots_notification_updates_directory() {
        let temp = TempDir::new().unwrap();
        let mut s = server(&temp);
        initialize(&mut s);

        let notification = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: methods::ROOTS_LIST_CHANGED.to_string(),
            params: Some(serde_json::json!({
                "roots": [{"uri": "file:///var/tmp/qr-from-peer"}]
            })),
        };

        let response = s.handle_request(notification);
        // Notification: nothing to send back
        assert!(response.id.is_none() && response.result.is_none() && response.error.is_none());

        assert_eq!(
            s.manager().provider().get_current_directory(),
            PathBuf::from("/var/tmp/qr-from-peer")
        );
    }

    #[test]
    fn test_malformed_roots_notification_is_ignored() {
        let temp = TempDir::new().unwrap();
        let mut s = server(&temp);
        initialize(&mut s);

        let before = s.manager().provider().get_current_directory();
        let notification = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: methods::ROOTS_LIST_CHANGED.to_string(),
            params: Some(serde_json::json!({"roots": "not-an-array"})),
        };
        s.handle_request(notification);

        assert_eq!(s.manager().provider().get_current_directory(), before);
    }

    #[test]
    fn test_tool_call_set_directory() {
        let temp = TempDir::new().unwrap();
        let mut s = server(&temp);
        initialize(&mut s);

        let response = s.handle_request(request(
            methods::TOOLS_CALL,
            2,
            Some(serde_json::json!({
                "name": "set_directory",
                "arguments": {"path": "/var/tmp/qr-tool-set"}
            })),
        ));

        assert!(response.error.is_none());
        assert_eq!(
            s.manager().provider().get_current_directory(),
            PathBuf::from("/var/tmp/qr-tool-set")
        );
    }
}
