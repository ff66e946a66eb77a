//! Directory Tools - Output Directory Diagnostics and Administration

use super::McpTool;
use crate::roots::{OperationMetric, RootsManager};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// list_allowed_directories
// ============================================================================

pub struct ListAllowedDirectoriesTool;

#[derive(Debug, Serialize)]
struct ListAllowedDirectoriesResult {
    whitelisted_directories: Vec<String>,

    /// False means no containment restriction is configured
    whitelist_enforced: bool,

    current_directory: String,
}

impl McpTool for ListAllowedDirectoriesTool {
    fn name(&self) -> &'static str {
        "list_allowed_directories"
    }

    fn description(&self) -> &'static str {
        "List whitelisted output directories and the currently active one"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn execute(&self, _args: Value, manager: &RootsManager) -> Result<Value> {
        let policy = manager.get_security_policy();
        let whitelisted: Vec<String> = policy
            .whitelisted_directories
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        let result = ListAllowedDirectoriesResult {
            whitelist_enforced: !whitelisted.is_empty(),
            whitelisted_directories: whitelisted,
            current_directory: manager
                .provider()
                .get_current_directory()
                .display()
                .to_string(),
        };

        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// get_directory_info
// ============================================================================

pub struct GetDirectoryInfoTool;

#[derive(Debug, Deserialize)]
struct GetDirectoryInfoArgs {
    #[serde(default = "default_metrics_limit")]
    metrics_limit: usize,
}

fn default_metrics_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
struct GetDirectoryInfoResult {
    path: String,
    source: String,
    valid: bool,
    last_updated: String,
    recent_operations: Vec<OperationMetric>,
}

impl McpTool for GetDirectoryInfoTool {
    fn name(&self) -> &'static str {
        "get_directory_info"
    }

    fn description(&self) -> &'static str {
        "Show the effective output directory, its provenance, and recent operations"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "metrics_limit": {
                    "type": "integer",
                    "default": 10
                }
            }
        })
    }

    fn execute(&self, args: Value, manager: &RootsManager) -> Result<Value> {
        let args: GetDirectoryInfoArgs = serde_json::from_value(args).unwrap_or(GetDirectoryInfoArgs {
            metrics_limit: default_metrics_limit(),
        });

        let status = manager.provider().status();

        let result = GetDirectoryInfoResult {
            path: status.path.display().to_string(),
            source: status.source.to_string(),
            valid: status.valid,
            last_updated: status.last_updated.to_rfc3339(),
            recent_operations: manager.get_performance_metrics(args.metrics_limit),
        };

        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// set_directory
// ============================================================================

pub struct SetDirectoryTool;

#[derive(Debug, Deserialize)]
struct SetDirectoryArgs {
    path: String,
}

impl McpTool for SetDirectoryTool {
    fn name(&self) -> &'static str {
        "set_directory"
    }

    fn description(&self) -> &'static str {
        "Set the output directory; the path goes through full security validation"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string"
                }
            },
            "required": ["path"]
        })
    }

    fn execute(&self, args: Value, manager: &RootsManager) -> Result<Value> {
        let args: SetDirectoryArgs = serde_json::from_value(args)
            .map_err(|e| anyhow::anyhow!("Invalid parameter 'path': {}", e))?;

        let result = manager.handle_roots_changed(&[args.path]);
        Ok(serde_json::to_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigProvider;
    use crate::security::{PathSecurityValidator, RateLimiter, SecurityPolicy};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager(temp: &TempDir, whitelist: Vec<PathBuf>) -> RootsManager {
        let validator = Arc::new(PathSecurityValidator::with_rate_limiter(
            SecurityPolicy {
                whitelisted_directories: whitelist,
                forbidden_patterns: Vec::new(),
                ..SecurityPolicy::default()
            },
            RateLimiter::new(1000, Duration::from_secs(1)),
        ));
        let provider = Arc::new(ConfigProvider::new(temp.path().join("default")));
        let m = RootsManager::new(validator, provider);
        m.initialize();
        m
    }

    #[test]
    fn test_list_allowed_directories() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp, vec![PathBuf::from("/a/b")]);

        let value = ListAllowedDirectoriesTool
            .execute(json!({}), &m)
            .unwrap();

        assert_eq!(value["whitelist_enforced"], true);
        assert_eq!(value["whitelisted_directories"][0], "/a/b");
        assert_eq!(
            value["current_directory"],
            temp.path().join("default").display().to_string()
        );
    }

    #[test]
    fn test_get_directory_info() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp, Vec::new());
        m.handle_roots_changed(&["/var/tmp/qr-info".to_string()]);

        let value = GetDirectoryInfoTool.execute(json!({}), &m).unwrap();

        assert_eq!(value["path"], "/var/tmp/qr-info");
        assert_eq!(value["source"], "external_roots");
        assert_eq!(value["valid"], true);
        assert!(!value["recent_operations"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_set_directory_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp, Vec::new());

        let value = SetDirectoryTool
            .execute(json!({"path": "../../etc"}), &m)
            .unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(
            m.provider().get_current_directory(),
            temp.path().join("default")
        );
    }

    #[test]
    fn test_set_directory_requires_path() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp, Vec::new());

        let err = SetDirectoryTool.execute(json!({}), &m).unwrap_err();
        assert!(err.to_string().contains("path"));
    }
}
