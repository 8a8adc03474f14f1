//! Typed client configuration.
//!
//! Every recognized option is an explicit struct field with a validated
//! default; out-of-range values are rejected when the client is built
//! rather than surfacing as misbehavior at runtime.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Unit of the rate-limit interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePer {
    Second,
    Minute,
}

/// Token-bucket sizing: `count` requests per interval unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub count: u32,
    pub per: RatePer,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            count: 100,
            per: RatePer::Minute,
        }
    }
}

impl RateLimitConfig {
    /// Bucket refill rate in tokens per second.
    pub fn tokens_per_second(&self) -> f64 {
        match self.per {
            RatePer::Second => f64::from(self.count),
            RatePer::Minute => f64::from(self.count) / 60.0,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::Zero {
                field: "rate_limit.count",
            });
        }
        Ok(())
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Zero {
                field: "circuit_breaker.failure_threshold",
            });
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "circuit_breaker.reset_timeout",
            });
        }
        Ok(())
    }
}

/// Two-tier cache sizing and TTLs.
///
/// Negative entries memoize slow-changing absences (deleted upstream
/// records), so their TTL defaults to days while positive entries
/// default to a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub memory_capacity: usize,
    pub disk_dir: PathBuf,
    pub positive_ttl: Duration,
    pub negative_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 100,
            disk_dir: PathBuf::from(".curator-cache"),
            positive_ttl: Duration::from_secs(24 * 60 * 60),
            negative_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.positive_ttl.is_zero() {
            return Err(ConfigError::Zero {
                field: "cache.positive_ttl",
            });
        }
        if self.negative_ttl.is_zero() {
            return Err(ConfigError::Zero {
                field: "cache.negative_ttl",
            });
        }
        Ok(())
    }
}

/// Batch coordinator sizing and adaptation thresholds.
///
/// The thresholds are heuristics, not derived constants; they are kept
/// configurable on purpose.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Maximum concurrent in-flight fetches across the whole run.
    pub max_concurrent: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// Chunk size used before any success-rate history exists.
    pub base_size: usize,
    /// Success rate at or above which the chunk size grows.
    pub scale_up_threshold: f64,
    /// Success rate below which the chunk size is halved (quartered
    /// below half of this mark).
    pub scale_down_threshold: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            min_size: 5,
            max_size: 100,
            base_size: 10,
            scale_up_threshold: 0.95,
            scale_down_threshold: 0.50,
        }
    }
}

impl BatchConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Zero {
                field: "batch.max_concurrent",
            });
        }
        if self.min_size == 0 {
            return Err(ConfigError::Zero {
                field: "batch.min_size",
            });
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::BatchBounds {
                min: self.min_size,
                max: self.max_size,
            });
        }
        if self.base_size < self.min_size || self.base_size > self.max_size {
            return Err(ConfigError::OutOfRange {
                field: "batch.base_size",
                min: self.min_size as u64,
                max: self.max_size as u64,
                got: self.base_size as u64,
            });
        }
        for (field, value) in [
            ("batch.scale_up_threshold", self.scale_up_threshold),
            ("batch.scale_down_threshold", self.scale_down_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::BadRatio { field, got: value });
            }
        }
        Ok(())
    }
}

/// Retry budget for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(2_000),
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > 0 && self.base_delay.is_zero() {
            return Err(ConfigError::Zero {
                field: "retry.base_delay",
            });
        }
        Ok(())
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Optional bearer token applied by the transport layer.
    pub api_key: Option<String>,
    pub user_agent: String,
    /// Per-request timeout (enforced per executor call, not per batch).
    pub timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://registry.example.com/api/v1"),
            api_key: None,
            user_agent: String::from("curator/0.1.0"),
            timeout: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::BadBaseUrl {
                got: self.base_url.clone(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Zero { field: "timeout" });
        }
        self.rate_limit.validate()?;
        self.circuit_breaker.validate()?;
        self.cache.validate()?;
        self.batch.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}
