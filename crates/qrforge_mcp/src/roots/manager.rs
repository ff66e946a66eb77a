//! Roots Manager - Orchestration of Roots Announcements
//!
//! Entry point for the protocol dispatcher when the peer announces new roots.
//! Applies admission control before any validation work, validates every
//! candidate, selects the first valid one (stable, deterministic), re-checks
//! it in isolation, and commits it to the configuration provider.
//!
//! # Lifecycle
//!
//! UNINITIALIZED -> READY -> SHUTTING_DOWN -> SHUTDOWN (terminal).
//! `handle_roots_changed` is only accepted in READY and fails fast otherwise.

use crate::config::ConfigProvider;
use crate::security::{
    PathSecurityValidator, PolicyUpdate, SecurityPolicy, SecurityViolation,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Caller identity for the single protocol notification channel
const ROOTS_CALLER_ID: &str = "global";

/// Retained operation metrics, per operation kind
const METRICS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Ready,
    ShuttingDown,
    Shutdown,
}

/// Structured outcome of a roots-changed request; never a panic
#[derive(Debug, Clone, Serialize)]
pub struct RootsChangeResult {
    pub success: bool,

    /// The committed directory, when `success`
    pub updated_roots: Vec<String>,

    pub errors: Vec<String>,

    /// Violations aggregated across all rejected candidates
    pub violations: Vec<SecurityViolation>,

    pub rate_limited: bool,

    pub timestamp: DateTime<Utc>,
}

impl RootsChangeResult {
    fn failure(errors: Vec<String>, violations: Vec<SecurityViolation>) -> Self {
        Self {
            success: false,
            updated_roots: Vec::new(),
            errors,
            violations,
            rate_limited: false,
            timestamp: Utc::now(),
        }
    }
}

/// Dry-run outcome: which candidates would pass, and why the rest would not
#[derive(Debug, Clone, Serialize)]
pub struct RootsValidationResult {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
    pub violations: Vec<SecurityViolation>,

    /// True when the admission gate rejected the call before any validation
    pub rate_limited: bool,
}

/// One recorded operation, kept in a bounded ring for perf regression checks
#[derive(Debug, Clone, Serialize)]
pub struct OperationMetric {
    pub operation: String,
    pub duration_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Orchestrates validator and provider for the roots channel
pub struct RootsManager {
    validator: Arc<PathSecurityValidator>,
    provider: Arc<ConfigProvider>,
    state: Mutex<Lifecycle>,
    /// One bounded ring per operation kind, so a burst of one kind never
    /// evicts the history of another
    metrics: Mutex<HashMap<&'static str, VecDeque<OperationMetric>>>,
}

impl RootsManager {
    pub fn new(validator: Arc<PathSecurityValidator>, provider: Arc<ConfigProvider>) -> Self {
        Self {
            validator,
            provider,
            state: Mutex::new(Lifecycle::Uninitialized),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    /// Transition to READY; idempotent while not shut down
    pub fn initialize(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            Lifecycle::Uninitialized => {
                *state = Lifecycle::Ready;
                info!("roots manager ready");
            }
            Lifecycle::Ready => {}
            Lifecycle::ShuttingDown | Lifecycle::Shutdown => {
                warn!("initialize called after shutdown; ignored");
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) == Lifecycle::Ready
    }

    /// Idempotent shutdown: releases observer registrations and makes
    /// subsequent `handle_roots_changed` calls fail fast
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == Lifecycle::Shutdown {
                return;
            }
            *state = Lifecycle::ShuttingDown;
        }

        self.provider.shutdown();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = Lifecycle::Shutdown;
        info!("roots manager shut down");
    }

    /// Handle a roots announcement from the protocol peer
    ///
    /// Never panics outward; any internal panic is converted into a failure
    /// result.
    pub fn handle_roots_changed(&self, raw_roots: &[String]) -> RootsChangeResult {
        let raw_roots = raw_roots.to_vec();
        catch_unwind(AssertUnwindSafe(|| self.handle_roots_changed_inner(&raw_roots)))
            .unwrap_or_else(|_| {
                RootsChangeResult::failure(
                    vec!["internal error while applying roots change".to_string()],
                    Vec::new(),
                )
            })
    }

    fn handle_roots_changed_inner(&self, raw_roots: &[String]) -> RootsChangeResult {
        let started = Instant::now();

        if !self.is_ready() {
            return RootsChangeResult::failure(
                vec!["roots manager is not ready".to_string()],
                Vec::new(),
            );
        }
        if raw_roots.is_empty() {
            return RootsChangeResult::failure(vec!["no roots provided".to_string()], Vec::new());
        }

        // Admission control before any validation work: a misbehaving peer
        // must not be able to drive filesystem probes at line rate
        let rate = self.validator.check_rate_limit(ROOTS_CALLER_ID);
        if rate.limited {
            debug!(
                requests = rate.requests_in_window,
                retry_in_ms = rate.window_remaining_ms,
                "roots change rejected by rate limit"
            );
            let mut result = RootsChangeResult::failure(
                vec![format!(
                    "rate limited: retry in {}ms",
                    rate.window_remaining_ms
                )],
                Vec::new(),
            );
            result.rate_limited = true;
            self.record_metric("roots_changed", started, false, serde_json::json!({"rate_limited": true}));
            return result;
        }

        // Validate every candidate, not just the first, so the caller can
        // diagnose the whole batch
        let validation = self.validate_candidates(raw_roots);
        if validation.valid.is_empty() {
            warn!(
                candidates = raw_roots.len(),
                "all announced roots failed validation"
            );
            self.record_metric(
                "roots_changed",
                started,
                false,
                serde_json::json!({"candidates": raw_roots.len()}),
            );
            return RootsChangeResult::failure(
                vec![format!(
                    "no valid directory among {} candidate(s)",
                    raw_roots.len()
                )],
                validation.violations,
            );
        }

        // First-valid-wins: input order decides, no reordering heuristics
        let selected = validation.valid[0].clone();

        // Defense in depth: re-validate the selection in isolation before
        // committing it
        let recheck = self.validator.validate(&selected);
        if !recheck.secure {
            self.record_metric("roots_changed", started, false, serde_json::Value::Null);
            return RootsChangeResult::failure(
                vec![format!("selected directory failed re-validation: {}", selected)],
                recheck.violations,
            );
        }

        let committed = PathBuf::from(&recheck.sanitized_path);
        let changed = self.provider.update_from_external(committed);
        info!(directory = %selected, changed, "external root committed");

        self.record_metric(
            "roots_changed",
            started,
            true,
            serde_json::json!({"changed": changed}),
        );

        RootsChangeResult {
            success: true,
            updated_roots: vec![selected],
            errors: Vec::new(),
            violations: Vec::new(),
            rate_limited: false,
            timestamp: Utc::now(),
        }
    }

    /// Read-only validation of a candidate batch; commits nothing
    ///
    /// Shares the admission gate with `handle_roots_changed`: a rate-limited
    /// peer cannot drive validation work (or filesystem probes) through the
    /// dry-run path either.
    pub fn validate_roots(&self, raw_roots: &[String]) -> RootsValidationResult {
        let started = Instant::now();

        if !self.is_ready() {
            return RootsValidationResult {
                valid: Vec::new(),
                invalid: raw_roots.to_vec(),
                violations: Vec::new(),
                rate_limited: false,
            };
        }

        let rate = self.validator.check_rate_limit(ROOTS_CALLER_ID);
        if rate.limited {
            debug!(
                requests = rate.requests_in_window,
                retry_in_ms = rate.window_remaining_ms,
                "dry-run validation rejected by rate limit"
            );
            self.record_metric(
                "validation",
                started,
                false,
                serde_json::json!({"rate_limited": true}),
            );
            return RootsValidationResult {
                valid: Vec::new(),
                invalid: raw_roots.to_vec(),
                violations: Vec::new(),
                rate_limited: true,
            };
        }

        let result = self.validate_candidates(raw_roots);
        self.record_metric(
            "validation",
            started,
            result.invalid.is_empty(),
            serde_json::json!({"candidates": raw_roots.len()}),
        );
        result
    }

    fn validate_candidates(&self, raw_roots: &[String]) -> RootsValidationResult {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        let mut violations = Vec::new();

        for root in raw_roots {
            let result = self.validator.validate(root);
            if result.secure {
                valid.push(result.sanitized_path);
            } else {
                invalid.push(root.clone());
                violations.extend(result.violations);
            }
        }

        RootsValidationResult {
            valid,
            invalid,
            violations,
            rate_limited: false,
        }
    }

    /// Currently active directory; single-active design, so the list has at
    /// most one element (empty once shut down)
    pub fn get_current_roots(&self) -> Vec<String> {
        if !self.is_ready() {
            return Vec::new();
        }
        vec![self.provider.get_current_directory().display().to_string()]
    }

    /// Clear the external source and any cached limiter state, forcing the
    /// provider back to its precedence fallback. Idempotent.
    pub fn reset_to_defaults(&self) -> RootsChangeResult {
        let started = Instant::now();

        if !self.is_ready() {
            return RootsChangeResult::failure(
                vec!["roots manager is not ready".to_string()],
                Vec::new(),
            );
        }

        self.provider.clear_external();
        self.validator.reset_rate_limits();
        let current = self.provider.get_current_directory();

        info!(directory = %current.display(), "configuration reset to precedence fallback");
        self.record_metric("config_update", started, true, serde_json::Value::Null);

        RootsChangeResult {
            success: true,
            updated_roots: vec![current.display().to_string()],
            errors: Vec::new(),
            violations: Vec::new(),
            rate_limited: false,
            timestamp: Utc::now(),
        }
    }

    /// Replace parts of the security policy
    pub fn update_security_policy(&self, update: PolicyUpdate) {
        let started = Instant::now();
        self.validator.update_policy(update);
        self.record_metric("config_update", started, true, serde_json::json!({"policy": true}));
    }

    pub fn get_security_policy(&self) -> Arc<SecurityPolicy> {
        self.validator.policy()
    }

    /// Most recent operation metrics across all kinds, oldest first, capped
    /// at `limit`
    pub fn get_performance_metrics(&self, limit: usize) -> Vec<OperationMetric> {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let mut merged: Vec<OperationMetric> =
            metrics.values().flatten().cloned().collect();
        merged.sort_by_key(|metric| metric.timestamp);
        let skip = merged.len().saturating_sub(limit);
        merged.split_off(skip)
    }

    /// Access to collaborators for the tool surface
    pub fn provider(&self) -> &Arc<ConfigProvider> {
        &self.provider
    }

    pub fn validator(&self) -> &Arc<PathSecurityValidator> {
        &self.validator
    }

    fn record_metric(
        &self,
        operation: &'static str,
        started: Instant,
        success: bool,
        metadata: serde_json::Value,
    ) {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let ring = metrics.entry(operation).or_default();
        if ring.len() == METRICS_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(OperationMetric {
            operation: operation.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            success,
            timestamp: Utc::now(),
            metadata,
        });
    }
}
