use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Sliding-window request limiter
pub trait RateLimiter: Send + Sync {
    /// Record a hit for `key` and report whether it is within `limit` hits per `window`
    fn check(&self, key: &str, limit: usize, window: Duration) -> bool;

    /// Drop keys with no hits inside the retention window; returns how many were removed
    fn sweep(&self) -> usize;
}

/// Rate limiter keeping request instants per key in process memory
pub struct InMemoryRateLimiter {
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
    retention: Duration,
}

impl InMemoryRateLimiter {
    /// `retention` should be the longest window any caller passes to `check`
    pub fn new(retention: Duration) -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.hits.lock().len()
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        let entry = hits.entry(key.to_string()).or_default();

        while let Some(oldest) = entry.front() {
            if now.duration_since(*oldest) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= limit {
            return false;
        }

        entry.push_back(now);
        true
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        let before = hits.len();

        hits.retain(|_, instants| {
            instants.retain(|at| now.duration_since(*at) < self.retention);
            !instants.is_empty()
        });

        before - hits.len()
    }
}
