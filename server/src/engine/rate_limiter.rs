use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::events::UserId;

/// Token-bucket rate limiter keyed by user. A full bucket holds `max_tokens`
/// and refills completely over `window`.
pub struct RateLimiter {
    buckets: DashMap<UserId, Bucket>,
    max_tokens: u32,
    refill_rate: f64, // tokens per second
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        let window = window.as_secs_f64().max(f64::EPSILON);
        Self {
            buckets: DashMap::new(),
            max_tokens,
            refill_rate: f64::from(max_tokens) / window,
        }
    }

    /// Take one token for `user_id`. Returns false when the bucket is empty.
    pub fn check(&self, user_id: UserId) -> bool {
        let now = Instant::now();
        let max = f64::from(self.max_tokens);
        let mut bucket = self.buckets.entry(user_id).or_insert(Bucket {
            tokens: max,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(max);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets untouched for longer than `older_than`.
    pub fn cleanup(&self, older_than: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, b| now.duration_since(b.last_refill) < older_than);
    }
}
