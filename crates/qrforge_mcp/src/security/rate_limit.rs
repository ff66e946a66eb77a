//! Rate Limiting - Admission Control for Configuration Changes
//!
//! Fixed-window counter keyed by caller identity. This is the only
//! admission-control mechanism in front of the validation pipeline, so it
//! must run before any expensive work (especially filesystem probes).

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default: one accepted configuration change per second per caller
pub const DEFAULT_MAX_PER_WINDOW: u32 = 1;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Snapshot of a caller's current window, returned by every check
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitState {
    pub requests_in_window: u32,

    /// True when the caller has exceeded the window budget
    pub limited: bool,

    /// Milliseconds until the current window resets
    pub window_remaining_ms: u64,
}

struct Window {
    started: Instant,
    requests: u32,
}

/// Fixed-window rate limiter
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record an admission attempt for `caller_id` and report its state
    ///
    /// The attempt is counted even when the caller ends up limited; the
    /// window resets once `window` has elapsed since its first request.
    pub fn check(&self, caller_id: &str) -> RateLimitState {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let entry = windows
            .entry(caller_id.to_string())
            .or_insert_with(|| Window {
                started: now,
                requests: 0,
            });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.requests = 0;
        }

        entry.requests += 1;

        let elapsed = now.duration_since(entry.started);
        let remaining = self.window.saturating_sub(elapsed);

        RateLimitState {
            requests_in_window: entry.requests,
            limited: entry.requests > self.max_per_window,
            window_remaining_ms: remaining.as_millis() as u64,
        }
    }

    /// Forget a caller's window, e.g. on reset-to-defaults
    pub fn reset(&self, caller_id: &str) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.remove(caller_id);
    }

    /// Forget all windows
    pub fn reset_all(&self) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_WINDOW, DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_allowed() {
        let limiter = RateLimiter::default();
        let state = limiter.check("global");

        assert!(!state.limited);
        assert_eq!(state.requests_in_window, 1);
    }

    #[test]
    fn test_second_request_in_window_limited() {
        let limiter = RateLimiter::default();
        limiter.check("global");
        let state = limiter.check("global");

        assert!(state.limited);
        assert_eq!(state.requests_in_window, 2);
    }

    #[test]
    fn test_callers_tracked_independently() {
        let limiter = RateLimiter::default();
        limiter.check("a");
        let state = limiter.check("b");

        assert!(!state.limited);
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        limiter.check("global");
        assert!(limiter.check("global").limited);

        std::thread::sleep(Duration::from_millis(30));
        let state = limiter.check("global");

        assert!(!state.limited);
        assert_eq!(state.requests_in_window, 1);
    }

    #[test]
    fn test_reset_clears_window() {
        let limiter = RateLimiter::default();
        limiter.check("global");
        limiter.check("global");
        limiter.reset("global");

        let state = limiter.check("global");
        assert!(!state.limited);
    }

    #[test]
    fn test_exactly_allowed_count_succeeds() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        let allowed = (0..10).filter(|_| !limiter.check("global").limited).count();
        assert_eq!(allowed, 3);
    }
}
