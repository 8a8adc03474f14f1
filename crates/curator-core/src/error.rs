//! Error taxonomy for the fetch pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::endpoint::Endpoint;

/// Classification used by retry and reporting logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    RateLimited,
    ServerError,
    ClientError,
    NotFound,
    Network,
    CircuitOpen,
    Cancelled,
}

/// A failed fetch.
///
/// `Timeout`, `RateLimited`, `ServerError` and `Network` are transient
/// and retried internally up to the configured budget. `NotFound` is a
/// valid negative result (cached, never retried). `CircuitOpen` fails
/// fast without a network attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited by upstream{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error: status {status}")]
    ServerError { status: u16 },

    #[error("client error: status {status}")]
    ClientError { status: u16 },

    #[error("no upstream record")]
    NotFound,

    #[error("network error: {0}")]
    Network(String),

    #[error("circuit breaker open for endpoint '{endpoint}'")]
    CircuitOpen { endpoint: Endpoint },

    #[error("batch cancelled before this item started")]
    Cancelled,
}

impl FetchError {
    pub const fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Timeout => FetchErrorKind::Timeout,
            Self::RateLimited { .. } => FetchErrorKind::RateLimited,
            Self::ServerError { .. } => FetchErrorKind::ServerError,
            Self::ClientError { .. } => FetchErrorKind::ClientError,
            Self::NotFound => FetchErrorKind::NotFound,
            Self::Network(_) => FetchErrorKind::Network,
            Self::CircuitOpen { .. } => FetchErrorKind::CircuitOpen,
            Self::Cancelled => FetchErrorKind::Cancelled,
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited { .. } | Self::ServerError { .. } | Self::Network(_)
        )
    }
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {:.1}s)", delay.as_secs_f64()),
        None => String::new(),
    }
}

/// Configuration rejected at construction time.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be within {min}..={max}, got {got}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        got: u64,
    },

    #[error("{field} must be a ratio in (0.0, 1.0], got {got}")]
    BadRatio { field: &'static str, got: f64 },

    #[error("batch min_size ({min}) must not exceed max_size ({max})")]
    BatchBounds { min: usize, max: usize },

    #[error("base_url must start with http:// or https://, got '{got}'")]
    BadBaseUrl { got: String },

    #[error("cache disk_dir '{path}' is unusable: {message}")]
    CacheDir { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes_are_retryable() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::RateLimited { retry_after: None }.is_transient());
        assert!(FetchError::ServerError { status: 503 }.is_transient());
        assert!(FetchError::Network(String::from("reset")).is_transient());
    }

    #[test]
    fn terminal_classes_are_not_retryable() {
        assert!(!FetchError::NotFound.is_transient());
        assert!(!FetchError::ClientError { status: 400 }.is_transient());
        assert!(!FetchError::Cancelled.is_transient());
        assert!(!FetchError::CircuitOpen {
            endpoint: Endpoint::Model
        }
        .is_transient());
    }

    #[test]
    fn config_errors_compare_across_all_variants() {
        let ratio = ConfigError::BadRatio {
            field: "batch.scale_up_threshold",
            got: 1.5,
        };
        assert_eq!(
            ratio,
            ConfigError::BadRatio {
                field: "batch.scale_up_threshold",
                got: 1.5,
            }
        );
        assert_ne!(ratio, ConfigError::Zero { field: "timeout" });
    }

    #[test]
    fn rate_limited_display_includes_retry_after() {
        let error = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(error.to_string().contains("2.0s"));
    }
}
