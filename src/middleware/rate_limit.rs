//! Rate limiting.
//!
//! In-memory sliding-window limiter keyed by caller. Each key keeps the
//! timestamps of its accepted requests; a request counts against the limit
//! while its age is strictly less than the window.

use crate::clock::SharedClock;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

pub const RATE_LIMIT_LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_WINDOW_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-window");

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Window rendered for the `X-RateLimit-Window` header, e.g. `60s`.
    pub fn window_label(&self) -> String {
        if self.window.subsec_millis() == 0 {
            format!("{}s", self.window.as_secs())
        } else {
            format!("{}ms", self.window.as_millis())
        }
    }

    /// Attach the limit ceiling and window to a response.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(self.max_requests));
        if let Ok(window) = HeaderValue::from_str(&self.window_label()) {
            headers.insert(RATE_LIMIT_WINDOW_HEADER, window);
        }
    }
}

/// Per-key request history, shared by every in-flight request.
///
/// A single lock guards the whole map, which makes prune-check-record one
/// atomic step per call.
pub struct SlidingWindowLimiter {
    clock: SharedClock,
    state: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl SlidingWindowLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `key` if fewer than `limit` requests fall inside
    /// the trailing `window`. Rejected attempts are not recorded.
    pub fn allow(&self, key: &str, limit: u32, window: Duration) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let hits = state.entry(key.to_string()).or_default();

        hits.retain(|seen| within_window(now, *seen, window));

        if hits.len() >= limit as usize {
            return false;
        }

        hits.push_back(now);
        true
    }

    /// Requests currently counted against `key`, without recording anything.
    pub fn in_window(&self, key: &str, window: Duration) -> usize {
        let now = self.clock.now();
        self.state
            .lock()
            .get(key)
            .map(|hits| hits.iter().filter(|seen| within_window(now, **seen, window)).count())
            .unwrap_or(0)
    }

    /// Number of distinct keys seen since start-up.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().len()
    }
}

/// Timestamps ahead of `now` (clock stepped back) count as age zero.
fn within_window(now: DateTime<Utc>, seen: DateTime<Utc>, window: Duration) -> bool {
    let age = now
        .signed_duration_since(seen)
        .to_std()
        .unwrap_or(Duration::ZERO);
    age < window
}
