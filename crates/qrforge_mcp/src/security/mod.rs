//! Security Subsystem
//!
//! Guards the one place where untrusted protocol input can influence
//! filesystem paths:
//! - Path validation: sanitization, traversal detection, whitelist containment
//! - Rate limiting: admission control on configuration churn
//! - Audit logging: bounded in-memory trail of validation outcomes
//!
//! # Design Principles
//!
//! Validation never panics on attacker input. Every failure mode is surfaced
//! as structured data (`SecurityValidationResult`); panics are reserved for
//! programming errors. The active `SecurityPolicy` is an immutable snapshot
//! replaced wholesale, so in-flight validations see consistent rules.

mod audit;
mod rate_limit;
mod validator;

pub use audit::{AuditLog, AuditLogEntry, AuditOutcome};
pub use rate_limit::{RateLimitState, RateLimiter};
pub use validator::PathSecurityValidator;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Classification of a failed security check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    PathTraversal,
    PermissionDenied,
    InvalidPath,
    WhitelistViolation,
}

/// Severity of a violation, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single failed check produced during validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub kind: ViolationKind,

    /// The path as supplied by the caller
    pub path: String,

    pub description: String,

    pub severity: Severity,
}

impl SecurityViolation {
    pub fn new(
        kind: ViolationKind,
        path: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            description: description.into(),
            severity,
        }
    }
}

/// Outcome of a full validation pass
///
/// Created fresh per call and not persisted; the caller decides whether to
/// log or discard it. `secure` is true iff `violations` is empty.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityValidationResult {
    pub secure: bool,

    /// Sanitized, normalized absolute path (best effort when insecure)
    pub sanitized_path: String,

    pub violations: Vec<SecurityViolation>,

    /// True only when a write-permission probe ran and succeeded
    pub has_write_permission: bool,

    /// True when the path matched the whitelist, or no whitelist is configured
    pub is_whitelisted: bool,
}

/// Security policy snapshot
///
/// Immutable once constructed; `PathSecurityValidator::update_policy` swaps
/// the whole object rather than mutating fields in place.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    /// Directories (or descendants) that validation will accept.
    /// Empty means no containment restriction beyond the other checks.
    pub whitelisted_directories: Vec<PathBuf>,

    /// Substrings rejected outright, checked in order
    pub forbidden_patterns: Vec<String>,

    /// Maximum accepted path length in characters
    pub max_path_length: usize,

    pub allow_relative_paths: bool,

    /// Probe the filesystem for write access before accepting a directory
    pub require_write_permission: bool,

    pub audit_logging_enabled: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            whitelisted_directories: Vec::new(),
            forbidden_patterns: vec![
                "/etc".to_string(),
                "/sys".to_string(),
                "/proc".to_string(),
                "/dev".to_string(),
                "/boot".to_string(),
            ],
            // Most restrictive common filesystem limit (Windows MAX_PATH)
            max_path_length: 260,
            allow_relative_paths: false,
            require_write_permission: false,
            audit_logging_enabled: true,
        }
    }
}

/// Partial policy update; `None` fields keep their current value
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub whitelisted_directories: Option<Vec<PathBuf>>,
    pub forbidden_patterns: Option<Vec<String>>,
    pub max_path_length: Option<usize>,
    pub allow_relative_paths: Option<bool>,
    pub require_write_permission: Option<bool>,
    pub audit_logging_enabled: Option<bool>,
}

impl SecurityPolicy {
    /// Merge a partial update over this policy into a new snapshot
    pub fn merged(&self, update: PolicyUpdate) -> Self {
        Self {
            whitelisted_directories: update
                .whitelisted_directories
                .unwrap_or_else(|| self.whitelisted_directories.clone()),
            forbidden_patterns: update
                .forbidden_patterns
                .unwrap_or_else(|| self.forbidden_patterns.clone()),
            max_path_length: update.max_path_length.unwrap_or(self.max_path_length),
            allow_relative_paths: update
                .allow_relative_paths
                .unwrap_or(self.allow_relative_paths),
            require_write_permission: update
                .require_write_permission
                .unwrap_or(self.require_write_permission),
            audit_logging_enabled: update
                .audit_logging_enabled
                .unwrap_or(self.audit_logging_enabled),
        }
    }
}
