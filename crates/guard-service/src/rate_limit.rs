//! Fixed-window rate limiter.
//!
//! One counter per key (`ip:<addr>` before authentication,
//! `client:<client_id>` after it). Increment-and-compare happens under a
//! single mutex with no I/O while it is held. Expired windows are reset on
//! the next request and evicted by the sweeper task.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct RateState {
    window_start: Instant,
    count: u32,
}

/// Per-key fixed-window request counter.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    state: Mutex<HashMap<String, RateState>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Count one request for `key`. Returns `false` once the key has used
    /// its allowance for the current window.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = state.entry(key.to_string()).or_insert(RateState {
            window_start: now,
            count: 0,
        });

        if now.saturating_duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            let count = entry.count;
            drop(state);
            tracing::warn!(
                target: "guard.rate_limit",
                key = %key,
                count,
                limit = self.max_requests,
                window_secs = self.window.as_secs(),
                "Rate limit exceeded"
            );
            return false;
        }

        entry.count += 1;
        true
    }

    /// Requests left for `key` in its current window.
    pub fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.get(key) {
            Some(entry) if now.saturating_duration_since(entry.window_start) < self.window => {
                self.max_requests.saturating_sub(entry.count)
            }
            _ => self.max_requests,
        }
    }

    /// Drop every key whose window has lapsed. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.len();
        state.retain(|_, entry| now.saturating_duration_since(entry.window_start) < self.window);
        before - state.len()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
