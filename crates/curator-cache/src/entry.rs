//! Cache record type shared by both tiers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Current wall-clock time as fractional unix seconds.
///
/// Records carry wall-clock timestamps (not `Instant`) so that disk
/// entries stay meaningful across process restarts.
pub fn now_unix() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

/// A single cached response, as stored on disk and in the memory tier.
///
/// A record is fresh while `now - inserted_at < ttl_seconds`. Negative
/// records memoize absent upstream results (404-equivalents) and are
/// written with a materially longer TTL than positive ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub value: Value,
    pub inserted_at: f64,
    pub ttl_seconds: f64,
    pub negative: bool,
}

impl CacheRecord {
    pub fn new(key: impl Into<String>, value: Value, ttl: Duration, negative: bool) -> Self {
        Self {
            key: key.into(),
            value,
            inserted_at: now_unix(),
            ttl_seconds: ttl.as_secs_f64(),
            negative,
        }
    }

    /// Freshness check against an explicit timestamp.
    pub fn is_fresh_at(&self, now: f64) -> bool {
        now - self.inserted_at < self.ttl_seconds
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(now_unix())
    }
}
