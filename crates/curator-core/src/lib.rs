//! # Curator Core
//!
//! Resilient, concurrent client for fetching asset metadata from a
//! rate-limited, occasionally-unreliable remote registry.
//!
//! ## Overview
//!
//! Five cooperating mechanisms protect the upstream and the caller:
//!
//! - **Token-bucket rate limiting**, scoped per endpoint
//! - **Circuit breaking** with open/half-open/closed state per endpoint
//! - **Two-tier caching** (memory LRU over a persistent disk store),
//!   including long-TTL negative caching of known-absent records
//! - **Batch coordination** over a bounded worker pool with adaptive
//!   batch sizing and cooperative cancellation
//! - **Single-flight enrichment** that collapses concurrent requests
//!   for the same parent record into one call
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Batch coordinator, fetch requests, cancellation |
//! | [`circuit_breaker`] | Per-endpoint circuit breaker |
//! | [`client`] | `MetadataClient` facade |
//! | [`config`] | Typed, validated configuration |
//! | [`endpoint`] | Logical remote operations |
//! | [`enrich`] | Deduplicating parent enrichment |
//! | [`error`] | Fetch and configuration errors |
//! | [`executor`] | Retrying request execution |
//! | [`http`] | Transport abstraction (reqwest + scripted mock) |
//! | [`rate_limit`] | Per-endpoint token buckets |
//! | [`retry`] | Exponential backoff schedule |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use curator_core::{ClientConfig, MetadataClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MetadataClient::new(ClientConfig::default())?;
//!     let version = client.version_by_hash("a1b2c3d4").await?;
//!     println!("matched: {}", version["name"]);
//!     Ok(())
//! }
//! ```
//!
//! ## Control flow
//!
//! ```text
//! caller ─▶ BatchCoordinator ─▶ Cache (hit short-circuits)
//!                │ miss
//!                ▼
//!          Enricher (dedup by parent key, single flight)
//!                │
//!                ▼
//!          CircuitBreaker (fail fast when open)
//!                │
//!                ▼
//!          RateLimiter (token bucket, exact-deficit wait)
//!                │
//!                ▼
//!          RequestExecutor (timeout, retry, backoff)
//! ```
//!
//! ## Error handling
//!
//! Per-item failures inside a batch are captured in
//! [`BatchResult::failures`] and never abort sibling items; a caller
//! asking for N records receives partial results plus an enumerated
//! failure list.

pub mod batch;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod enrich;
pub mod error;
pub mod executor;
pub mod http;
pub mod rate_limit;
pub mod retry;

// Re-export commonly used types at crate root for convenience

pub use batch::{AdaptiveSizer, BatchCoordinator, BatchResult, CancelToken, FetchRequest};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::MetadataClient;
pub use config::{
    BatchConfig, CacheConfig, CircuitBreakerConfig, ClientConfig, RateLimitConfig, RatePer,
    RetryConfig,
};
pub use endpoint::Endpoint;
pub use enrich::{EnrichItem, Enricher};
pub use error::{ConfigError, FetchError, FetchErrorKind};
pub use executor::{FetchParams, RequestExecutor};
pub use http::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use rate_limit::{EndpointRateLimiter, TokenBucket};
pub use retry::Backoff;

// Cache types (re-exported from curator-cache)
pub use curator_cache::{CacheError, CacheMode, Lookup, TieredCache};
