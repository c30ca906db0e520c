//! Sliding-window request limiter keyed by network bucket.
//!
//! Every call records its timestamp, rejected or not, so the window always
//! reflects the traffic a bucket actually sent. Counters are local to this
//! process; multiple instances each enforce their own ceiling.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Windows {
    buckets: HashMap<String, VecDeque<u64>>,
    last_sweep_ms: u64,
}

pub struct SlidingWindowLimiter {
    window_ms: u64,
    max_requests: usize,
    windows: Mutex<Windows>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1),
            max_requests,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Record a request from `bucket` at `now_ms` and report whether it fits
    /// within the ceiling.
    pub fn allow_at(&self, bucket: &str, now_ms: u64) -> bool {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cutoff = now_ms.saturating_sub(self.window_ms);

        if now_ms.saturating_sub(windows.last_sweep_ms) >= self.window_ms {
            windows
                .buckets
                .retain(|_, stamps| stamps.back().is_some_and(|last| *last > cutoff));
            windows.last_sweep_ms = now_ms;
        }

        let stamps = windows.buckets.entry(bucket.to_string()).or_default();
        while stamps.front().is_some_and(|first| *first <= cutoff) {
            stamps.pop_front();
        }
        stamps.push_back(now_ms);
        stamps.len() <= self.max_requests
    }

    /// Number of buckets currently tracked.
    pub fn tracked_buckets(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .buckets
            .len()
    }
}
