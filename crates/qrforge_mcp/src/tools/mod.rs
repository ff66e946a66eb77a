//! MCP Tool Implementations
//!
//! The diagnostic tool surface over the roots/configuration subsystem:
//!
//! - `list_allowed_directories`: whitelist and current effective directory
//! - `get_directory_info`: configuration provenance plus recent operations
//! - `set_directory`: administrative single-path roots change
//!
//! Each tool is a thin pass-through to `RootsManager`; all validation and
//! rate limiting happen inside the manager, never in the tool layer.

mod directory;
mod registry;

pub use registry::ToolRegistry;

use crate::protocol::ToolDefinition;
use crate::roots::RootsManager;
use anyhow::Result;
use serde_json::Value;

/// Trait for MCP tools
///
/// All tool execution is synchronous; tools receive the roots manager and
/// go through its public contract only.
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "set_directory")
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool (synchronous)
    fn execute(&self, args: Value, manager: &RootsManager) -> Result<Value>;

    /// Get the tool definition for tools/list
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
