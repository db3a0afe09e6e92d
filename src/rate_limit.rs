// src/rate_limit.rs

use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("rate limit exceeded, retry after {retry_after:?}")]
pub struct RateLimited {
    pub limit: u32,
    pub window: Duration,
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Windows {
    entries: HashMap<String, WindowEntry>,
    last_sweep: Instant,
}

impl Windows {
    /// Drops windows that have fully elapsed, at most once per window length.
    fn sweep_expired(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.last_sweep) < window {
            return;
        }
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.duration_since(e.window_start) < window);
        self.last_sweep = now;
        let dropped = before - self.entries.len();
        if dropped > 0 {
            debug!(dropped, remaining = self.entries.len(), "Expired rate limit windows swept");
        }
    }
}

/// Fixed-window request counter keyed by user id. Expired windows are swept
/// lazily from [`check`](Self::check), so idle users do not accumulate.
#[derive(Debug)]
pub struct UserRateLimiter {
    windows: Mutex<Windows>,
    max_requests: u32,
    window: Duration,
}

impl UserRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(Windows {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            max_requests,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    /// Counts one request for `user_id`, or rejects it if the window is full.
    pub fn check(&self, user_id: &str) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.sweep_expired(now, self.window);

        let entry = windows.entries.entry(user_id.to_string()).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.max_requests {
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(entry.window_start));
            warn!(
                user_id,
                count = entry.count,
                max_requests = self.max_requests,
                "Per-user rate limit exceeded"
            );
            return Err(RateLimited {
                limit: self.max_requests,
                window: self.window,
                retry_after,
            });
        }

        entry.count += 1;
        debug!(user_id, count = entry.count, max_requests = self.max_requests, "Rate limit check passed");
        Ok(())
    }

    pub fn tracked_users(&self) -> usize {
        self.windows.lock().entries.len()
    }
}
