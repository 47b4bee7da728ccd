//! Failure counts per operation type over a sliding window.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Sliding-window failure counter feeding the frequency escalation policy.
pub struct FailureWindow {
    window: Duration,
    failures: DashMap<String, VecDeque<Instant>>,
}

impl FailureWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            failures: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a failure and return the count inside the window, including it.
    pub fn record(&self, operation_type: &str) -> usize {
        let now = Instant::now();
        let mut entry = self.failures.entry(operation_type.to_string()).or_default();
        entry.push_back(now);
        Self::prune(&mut entry, self.window);
        entry.len()
    }

    pub fn count(&self, operation_type: &str) -> usize {
        match self.failures.get_mut(operation_type) {
            Some(mut entry) => {
                Self::prune(&mut entry, self.window);
                entry.len()
            }
            None => 0,
        }
    }

    fn prune(entries: &mut VecDeque<Instant>, window: Duration) {
        while entries.front().map_or(false, |at| at.elapsed() >= window) {
            entries.pop_front();
        }
    }
}
