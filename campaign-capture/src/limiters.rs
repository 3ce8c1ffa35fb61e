//! Per-client admission control for the ingestion endpoint.
//!
//! The in-memory limiter is process-local: running several replicas multiplies the
//! effective limit. Implement [`RateLimiter`] over a shared counter store to lift that.
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::gauge;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Admitted,
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    /// Seconds until the window resets, rounded up so clients never retry early.
    pub fn retry_after_secs(retry_after: Duration) -> u64 {
        let secs = retry_after.as_secs();
        if retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

#[async_trait]
pub trait RateLimiter {
    async fn check(&self, key: &str) -> RateLimitDecision;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window counter: at most `max_requests` admissions per key per `window`.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    max_requests: NonZeroU32,
    window: Duration,
    windows: Arc<DashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: NonZeroU32, window: Duration) -> Self {
        FixedWindowLimiter {
            max_requests,
            window,
            windows: Arc::new(DashMap::new()),
        }
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        // The entry guard holds the shard lock, so increment-or-reset is atomic per key.
        let mut window = self.windows.entry(key.to_owned()).or_insert(Window {
            count: 0,
            reset_at: now,
        });

        if now >= window.reset_at {
            *window = Window {
                count: 1,
                reset_at: now + self.window,
            };
            RateLimitDecision::Admitted
        } else if window.count < self.max_requests.get() {
            window.count += 1;
            RateLimitDecision::Admitted
        } else {
            RateLimitDecision::Limited {
                retry_after: window.reset_at - now,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn evict_expired(&self, now: Instant) {
        self.windows.retain(|_, window| window.reset_at > now);
    }

    /// Reports the number of tracked keys to prometheus every 10 seconds,
    /// needs to be spawned in a separate task.
    pub async fn report_metrics(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            gauge!("capture_rate_limiter_key_count").set(self.len() as f64);
        }
    }

    /// Drops expired windows once per window length so the map does not grow
    /// unbounded, needs to be spawned in a separate task.
    pub async fn clean_state(&self) {
        let mut interval = tokio::time::interval(self.window);
        loop {
            interval.tick().await;
            self.evict_expired(Instant::now());
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }
}
