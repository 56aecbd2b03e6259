//! Sliding-window admission control for REST requests.
//!
//! Binance accounts a weight to every REST endpoint against a per-minute
//! budget. [`RateLimiter`] tracks admitted weight as timestamps in a sliding
//! window; callers that are refused decide themselves whether to back off.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window request-weight limiter.
///
/// Admitted weight is stored as one [`Instant`] per unit inside a `VecDeque`
/// protected by a `parking_lot::Mutex`. The lock is only held briefly to
/// prune and count.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    stamps: parking_lot::Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting up to `max_requests` weight units per
    /// trailing `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            stamps: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    /// Try to admit `weight` units now.
    ///
    /// Returns `true` and records the weight if the trailing window still has
    /// room, `false` otherwise. Never blocks.
    pub fn allow(&self, weight: u32) -> bool {
        self.allow_at(Instant::now(), weight)
    }

    /// Try to admit `weight` units at a specific instant (for testing).
    pub fn allow_at(&self, now: Instant, weight: u32) -> bool {
        let mut stamps = self.stamps.lock();

        if let Some(cutoff) = now.checked_sub(self.window) {
            while let Some(&front) = stamps.front() {
                if front <= cutoff {
                    stamps.pop_front();
                } else {
                    break;
                }
            }
        }

        if stamps.len() as u64 + weight as u64 <= self.max_requests as u64 {
            for _ in 0..weight {
                stamps.push_back(now);
            }
            tracing::debug!(used = stamps.len(), max = self.max_requests, "rate limiter admit");
            true
        } else {
            false
        }
    }
}
