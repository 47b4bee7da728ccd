//! In-process fixed-window rate limiter.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use bastion_core::{traits::RateLimitStore, Result};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl Window {
    fn fresh() -> Self {
        Self {
            started: Instant::now(),
            count: 0,
        }
    }

    fn roll(&mut self, window: Duration) {
        if self.started.elapsed() >= window {
            *self = Self::fresh();
        }
    }
}

/// Fixed-window counters keyed by an arbitrary string.
///
/// Increment-and-check happens under the map entry's lock, so two callers
/// racing for the last slot cannot both be admitted. Ended windows are swept
/// at most once per window length, before the caller's entry is taken.
#[derive(Default)]
pub struct FixedWindowRateLimiter {
    windows: DashMap<String, Window>,
    last_sweep: Mutex<Option<Instant>>,
}

impl FixedWindowRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop counters whose window ended.
    pub fn cleanup(&self, window: Duration) {
        self.windows.retain(|_, w| w.started.elapsed() < window);
    }

    fn sweep_if_due(&self, window: Duration) {
        let Ok(mut last) = self.last_sweep.lock() else {
            return;
        };
        match *last {
            Some(at) if at.elapsed() < window => {}
            Some(_) => {
                let before = self.windows.len();
                self.cleanup(window);
                *last = Some(Instant::now());
                tracing::trace!(dropped = before.saturating_sub(self.windows.len()), "Swept ended rate limit windows");
            }
            None => *last = Some(Instant::now()),
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl RateLimitStore for FixedWindowRateLimiter {
    async fn check_and_increment(&self, key: &str, limit: u32, window: Duration) -> Result<bool> {
        self.sweep_if_due(window);
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(Window::fresh);
        entry.roll(window);

        if entry.count >= limit {
            tracing::debug!(key = key, limit = limit, "Rate limit window exhausted");
            return Ok(false);
        }

        entry.count += 1;
        Ok(true)
    }

    async fn remaining(&self, key: &str, limit: u32, window: Duration) -> Result<u32> {
        Ok(self
            .windows
            .get(key)
            .map(|w| {
                if w.started.elapsed() >= window {
                    limit
                } else {
                    limit.saturating_sub(w.count)
                }
            })
            .unwrap_or(limit))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.windows.remove(key);
        Ok(())
    }
}
