//! Audit Logging - Validation Outcome Recording
//!
//! Keeps a bounded in-memory ring buffer of validation outcomes. Entries are
//! append-only and evicted oldest-first; they are additionally emitted as
//! `tracing` events so they land in the regular log files.

use super::{SecurityViolation, Severity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Default ring buffer capacity
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// Outcome of an audited attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Allowed,
    Blocked,
    Error,
}

/// A single audit record; produced once and never mutated
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub attempted_path: String,
    pub outcome: AuditOutcome,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub metadata: serde_json::Value,
}

/// Bounded audit trail
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<AuditLogEntry>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a blocked attempt for one violation
    pub fn record_violation(&self, attempted_path: &str, violation: &SecurityViolation) {
        warn!(
            path = attempted_path,
            kind = ?violation.kind,
            severity = ?violation.severity,
            "blocked directory candidate: {}",
            violation.description
        );

        self.push(AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            attempted_path: attempted_path.to_string(),
            outcome: AuditOutcome::Blocked,
            reason: violation.description.clone(),
            severity: Some(violation.severity),
            metadata: serde_json::json!({ "kind": violation.kind }),
        });
    }

    /// Record an accepted path
    pub fn record_allowed(&self, attempted_path: &str, sanitized_path: &str) {
        info!(path = attempted_path, "directory candidate accepted");

        self.push(AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            attempted_path: attempted_path.to_string(),
            outcome: AuditOutcome::Allowed,
            reason: "validation passed".to_string(),
            severity: None,
            metadata: serde_json::json!({ "sanitized_path": sanitized_path }),
        });
    }

    /// Record an unexpected error during validation machinery
    pub fn record_error(&self, attempted_path: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(path = attempted_path, "audit error: {}", reason);

        self.push(AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            attempted_path: attempted_path.to_string(),
            outcome: AuditOutcome::Error,
            reason,
            severity: None,
            metadata: serde_json::Value::Null,
        });
    }

    fn push(&self, entry: AuditLogEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent entries, newest last, capped at `limit`
    pub fn recent(&self, limit: usize) -> Vec<AuditLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}
