//! Per-endpoint token-bucket rate limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::RateLimitConfig;
use crate::endpoint::Endpoint;

#[derive(Debug)]
struct BucketInner {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket for one endpoint.
///
/// Refill is computed lazily from elapsed wall time inside the critical
/// section; there is no background timer. `acquire` consumes one token,
/// sleeping for the exact computed deficit when the bucket is empty
/// rather than polling.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    inner: Mutex<BucketInner>,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.count);
        Self {
            capacity,
            refill_rate: config.tokens_per_second(),
            inner: Mutex::new(BucketInner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Block (asynchronously) until one token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().expect("token bucket lock not poisoned");
                Self::refill(&mut inner, self.capacity, self.refill_rate);
                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - inner.tokens) / self.refill_rate)
            };
            // Lock released across the sleep; a concurrent caller may win
            // the refilled token, so re-check after waking.
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (after a lazy refill).
    pub fn available(&self) -> f64 {
        let mut inner = self.inner.lock().expect("token bucket lock not poisoned");
        Self::refill(&mut inner, self.capacity, self.refill_rate);
        inner.tokens
    }

    fn refill(inner: &mut BucketInner, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * refill_rate).min(capacity);
        inner.last_refill = now;
    }
}

/// One token bucket per endpoint.
///
/// Buckets are pre-built for every [`Endpoint`] at construction, so
/// lookups are lock-free and one endpoint's wait never blocks another's.
#[derive(Debug)]
pub struct EndpointRateLimiter {
    buckets: HashMap<Endpoint, TokenBucket>,
}

impl EndpointRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let buckets = Endpoint::ALL
            .iter()
            .map(|&endpoint| (endpoint, TokenBucket::new(config)))
            .collect();
        Self { buckets }
    }

    pub async fn acquire(&self, endpoint: Endpoint) {
        self.bucket(endpoint).acquire().await;
    }

    pub fn available(&self, endpoint: Endpoint) -> f64 {
        self.bucket(endpoint).available()
    }

    fn bucket(&self, endpoint: Endpoint) -> &TokenBucket {
        self.buckets
            .get(&endpoint)
            .expect("buckets are pre-built for every endpoint")
    }
}
