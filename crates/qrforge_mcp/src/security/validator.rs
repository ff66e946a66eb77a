//! Path Security Validator
//!
//! Validates attacker-influenced directory candidates before they may become
//! the QR output directory.
//!
//! # Security Model
//!
//! - Sanitization strips control characters and collapses separators first
//! - Traversal detection runs on the *pre-normalization* string, so encoded
//!   or obfuscated `..` sequences are caught before resolution can mask them
//! - Whitelist containment matches whole path segments, never raw string
//!   prefixes (`/home/user2` does not match a `/home/user` whitelist entry)
//! - The only filesystem I/O is the optional write-permission probe, and it
//!   is skipped when structural checks have already failed
//!
//! All failure modes resolve to a `SecurityValidationResult` with
//! `secure: false`; this component never panics on malformed input.

use super::{
    AuditLog, PolicyUpdate, RateLimitState, RateLimiter, SecurityPolicy, SecurityValidationResult,
    SecurityViolation, Severity, ViolationKind,
};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Traversal sequences rejected on the sanitized, pre-normalization string.
/// Percent-encoded forms are matched case-insensitively.
const TRAVERSAL_PATTERNS: &[&str] = &["../", "..\\", "%2e%2e%2f", "%2e%2e%5c"];

/// Characters stripped during sanitization (plus null bytes)
const STRIPPED_CHARS: &[char] = &['<', '>', '"', '|', '?', '*'];

/// Validates candidate directories against the active `SecurityPolicy`
pub struct PathSecurityValidator {
    policy: RwLock<Arc<SecurityPolicy>>,
    audit: AuditLog,
    rate_limiter: RateLimiter,
}

impl PathSecurityValidator {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self::with_rate_limiter(policy, RateLimiter::default())
    }

    /// Construct with a non-default limiter (used by tests and embedders
    /// that shape traffic elsewhere)
    pub fn with_rate_limiter(policy: SecurityPolicy, rate_limiter: RateLimiter) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            audit: AuditLog::default(),
            rate_limiter,
        }
    }

    /// Snapshot of the active policy
    pub fn policy(&self) -> Arc<SecurityPolicy> {
        self.policy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Atomically replace the policy with `current merged update`
    ///
    /// In-flight validations that already captured the old snapshot complete
    /// under the old rules; there are no torn reads.
    pub fn update_policy(&self, update: PolicyUpdate) {
        let mut guard = self.policy.write().unwrap_or_else(|e| e.into_inner());
        let next = guard.merged(update);
        debug!(
            whitelist_len = next.whitelisted_directories.len(),
            max_path_length = next.max_path_length,
            "security policy replaced"
        );
        *guard = Arc::new(next);
    }

    /// Access the audit trail
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Record an admission attempt for `caller_id` against the fixed window
    pub fn check_rate_limit(&self, caller_id: &str) -> RateLimitState {
        self.rate_limiter.check(caller_id)
    }

    /// Forget rate-limit state, e.g. on reset-to-defaults
    pub fn reset_rate_limits(&self) {
        self.rate_limiter.reset_all();
    }

    /// Run the full validation pipeline on a raw candidate path
    ///
    /// All structural checks run and accumulate violations; only the
    /// filesystem probe short-circuits on prior HIGH/CRITICAL findings.
    pub fn validate(&self, raw: &str) -> SecurityValidationResult {
        let policy = self.policy();
        let mut violations = Vec::new();

        // 1. Sanitize
        let sanitized = sanitize(raw);
        if sanitized.is_empty() {
            violations.push(SecurityViolation::new(
                ViolationKind::InvalidPath,
                raw,
                "path is empty after sanitization",
                Severity::High,
            ));
        }

        // 2. Traversal detection on the pre-normalization string
        if contains_traversal(&sanitized) {
            violations.push(SecurityViolation::new(
                ViolationKind::PathTraversal,
                raw,
                "path contains a traversal sequence",
                Severity::Critical,
            ));
        }

        // Forbidden substrings, checked in policy order
        for pattern in &policy.forbidden_patterns {
            if !pattern.is_empty() && sanitized.contains(pattern.as_str()) {
                violations.push(SecurityViolation::new(
                    ViolationKind::InvalidPath,
                    raw,
                    format!("path matches forbidden pattern '{}'", pattern),
                    Severity::High,
                ));
            }
        }

        // 3. Length check
        if sanitized.chars().count() > policy.max_path_length {
            violations.push(SecurityViolation::new(
                ViolationKind::InvalidPath,
                raw,
                format!("path exceeds maximum length of {}", policy.max_path_length),
                Severity::Medium,
            ));
        }

        if !policy.allow_relative_paths && is_relative(&sanitized) {
            violations.push(SecurityViolation::new(
                ViolationKind::InvalidPath,
                raw,
                "relative paths are not permitted by policy",
                Severity::Medium,
            ));
        }

        // 4. Normalize to an absolute path
        let normalized = normalize(&sanitized);

        // 5. Whitelist containment
        let is_whitelisted = self.matches_whitelist(&policy, &normalized);
        if !is_whitelisted {
            violations.push(SecurityViolation::new(
                ViolationKind::WhitelistViolation,
                raw,
                "path is not within any whitelisted directory",
                Severity::High,
            ));
        }

        // 6. Write-permission probe; skipped on prior serious findings so
        //    clearly-invalid input never reaches the filesystem
        let structurally_sound = !violations
            .iter()
            .any(|v| v.severity >= Severity::High);
        let mut has_write_permission = false;
        if policy.require_write_permission && structurally_sound {
            match probe_writable(&normalized) {
                Ok(()) => has_write_permission = true,
                Err(reason) => {
                    violations.push(SecurityViolation::new(
                        ViolationKind::PermissionDenied,
                        raw,
                        format!("directory is not writable: {}", reason),
                        Severity::Medium,
                    ));
                }
            }
        }

        let sanitized_path = normalized.display().to_string();

        // 7. Audit every violation; accepted paths get one ALLOWED entry
        if policy.audit_logging_enabled {
            if violations.is_empty() {
                self.audit.record_allowed(raw, &sanitized_path);
            } else {
                for violation in &violations {
                    self.audit.record_violation(raw, violation);
                }
            }
        }

        SecurityValidationResult {
            secure: violations.is_empty(),
            sanitized_path,
            violations,
            has_write_permission,
            is_whitelisted,
        }
    }

    /// Cheap synchronous recheck: sanitize + traversal + whitelist only
    ///
    /// No filesystem I/O and no audit entries; used for fast-path
    /// pre-filtering before a full `validate` call.
    pub fn is_allowed(&self, raw: &str) -> bool {
        let sanitized = sanitize(raw);
        if sanitized.is_empty() || contains_traversal(&sanitized) {
            return false;
        }

        let policy = self.policy();
        self.matches_whitelist(&policy, &normalize(&sanitized))
    }

    fn matches_whitelist(&self, policy: &SecurityPolicy, normalized: &Path) -> bool {
        if policy.whitelisted_directories.is_empty() {
            return true;
        }

        policy.whitelisted_directories.iter().any(|entry| {
            let entry = normalize(&entry.to_string_lossy());
            // Component-wise prefix match, not a string prefix
            normalized == entry || normalized.starts_with(&entry)
        })
    }
}

/// Strip null bytes and shell-hostile characters, collapse duplicate
/// separators, trim surrounding whitespace
fn sanitize(raw: &str) -> String {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '\0' && !STRIPPED_CHARS.contains(c))
        .collect();

    let mut collapsed = String::with_capacity(stripped.len());
    let mut prev_sep: Option<char> = None;
    for c in stripped.chars() {
        if c == '/' || c == '\\' {
            if prev_sep == Some(c) {
                continue;
            }
            prev_sep = Some(c);
        } else {
            prev_sep = None;
        }
        collapsed.push(c);
    }
    collapsed
}

/// Detect literal and percent-encoded traversal sequences, plus bare `..`
/// path components
fn contains_traversal(sanitized: &str) -> bool {
    let lower = sanitized.to_ascii_lowercase();
    if TRAVERSAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }
    Path::new(sanitized)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}

fn is_relative(sanitized: &str) -> bool {
    !sanitized.starts_with('~') && Path::new(sanitized).is_relative()
}

/// Resolve to an absolute path: expand a leading `~`, anchor relative paths
/// at the working directory, and remove `.`/`..` segments lexically.
/// Purely lexical so nonexistent directories can still be validated.
fn normalize(sanitized: &str) -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));

    let expanded = if sanitized == "~" {
        home
    } else if let Some(rest) = sanitized.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(sanitized)
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(expanded)
    };

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                resolved.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                // Traversal was rejected earlier; resolve defensively here
                resolved.pop();
            }
        }
    }
    resolved
}

/// Create the directory if needed and confirm write access by creating and
/// deleting a uniquely named probe file
fn probe_writable(dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;

    let probe = dir.join(format!(".qrforge_probe_{}", Uuid::new_v4()));
    std::fs::write(&probe, b"probe").map_err(|e| e.to_string())?;
    std::fs::remove_file(&probe).map_err(|e| e.to_string())?;
    Ok(())
}
