use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-remote-address sliding-window connection limiter (spec.md §5: "at
/// most `N` connection attempts within a rolling window, default 10/60s").
/// `Sync` via an internal mutex so it can live behind `axum` shared state.
pub struct RateLimiter {
    max_attempts: u32,
    window: Duration,
    state: Mutex<HashMap<IpAddr, (u32, Instant)>>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Record a connection attempt from `ip`, returning `true` if it is
    /// within the rolling window's budget.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state.entry(ip).or_insert((0, now));

        if now.duration_since(entry.1) >= self.window {
            *entry = (1, now);
            return true;
        }

        if entry.0 < self.max_attempts {
            entry.0 += 1;
            true
        } else {
            false
        }
    }
}
