//! Client facade wiring the resilience stack together.

use std::collections::HashMap;
use std::sync::Arc;

use curator_cache::{CacheMode, TieredCache};
use serde_json::Value;
use tracing::debug;

use crate::batch::{BatchCoordinator, BatchResult, CancelToken, FetchRequest};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::enrich::{EnrichItem, Enricher};
use crate::error::{ConfigError, FetchError};
use crate::executor::{FetchParams, RequestExecutor};
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::rate_limit::EndpointRateLimiter;

/// Resilient, caching, deduplicating client for the metadata registry.
///
/// Every collaborator (cache, limiter, breaker, executor, coordinator,
/// enricher) is an explicit instance owned here and injected downward,
/// so tests construct fresh state per case.
pub struct MetadataClient {
    cache: Arc<TieredCache>,
    coordinator: Arc<BatchCoordinator>,
    enricher: Enricher,
    executor: Arc<RequestExecutor>,
}

impl MetadataClient {
    /// Build a client with the production reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::with_transport(config, Arc::new(ReqwestHttpClient::new()))
    }

    /// Build a client over an arbitrary transport (tests use the
    /// scripted one).
    pub fn with_transport(
        config: ClientConfig,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let limiter = Arc::new(EndpointRateLimiter::new(config.rate_limit));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
        let executor = Arc::new(RequestExecutor::new(http, limiter, breaker, &config));
        let cache = Arc::new(
            TieredCache::open(config.cache.memory_capacity, &config.cache.disk_dir).map_err(
                |error| ConfigError::CacheDir {
                    path: config.cache.disk_dir.display().to_string(),
                    message: error.to_string(),
                },
            )?,
        );
        let coordinator = Arc::new(BatchCoordinator::new(
            Arc::clone(&executor),
            Arc::clone(&cache),
            &config,
        ));
        let enricher = Enricher::new(Arc::clone(&coordinator), Endpoint::Model);

        debug!(base_url = %config.base_url, "metadata client initialized");
        Ok(Self {
            cache,
            coordinator,
            enricher,
            executor,
        })
    }

    /// Fetch one record through the full cache-and-resilience stack.
    pub async fn fetch_one(
        &self,
        endpoint: Endpoint,
        params: FetchParams,
    ) -> Result<Value, FetchError> {
        self.fetch_one_with(endpoint, params, CacheMode::Use).await
    }

    pub async fn fetch_one_with(
        &self,
        endpoint: Endpoint,
        params: FetchParams,
        mode: CacheMode,
    ) -> Result<Value, FetchError> {
        let request = FetchRequest::new("single", endpoint, params);
        let mut result = self
            .coordinator
            .run(vec![request], mode, &CancelToken::new())
            .await;
        if let Some(value) = result.successes.remove("single") {
            return Ok(value);
        }
        Err(result
            .failures
            .remove("single")
            .unwrap_or(FetchError::Cancelled))
    }

    /// Run a batch of fetches; per-item failures are enumerated, never
    /// thrown for the batch as a whole.
    pub async fn fetch_batch(&self, requests: Vec<FetchRequest>) -> BatchResult {
        self.coordinator
            .run(requests, CacheMode::Use, &CancelToken::new())
            .await
    }

    pub async fn fetch_batch_with(
        &self,
        requests: Vec<FetchRequest>,
        mode: CacheMode,
        cancel: &CancelToken,
    ) -> BatchResult {
        self.coordinator.run(requests, mode, cancel).await
    }

    /// Deduplicating parent lookup: at most one in-flight call per
    /// dedup key, fanned out to every primary key.
    pub async fn enrich(&self, items: Vec<EnrichItem>) -> HashMap<String, Value> {
        self.enricher
            .enrich(items, CacheMode::Use, &CancelToken::new())
            .await
    }

    pub async fn enrich_with(
        &self,
        items: Vec<EnrichItem>,
        mode: CacheMode,
        cancel: &CancelToken,
    ) -> HashMap<String, Value> {
        self.enricher.enrich(items, mode, cancel).await
    }

    /// Look up a version record by file hash (the primary lookup).
    pub async fn version_by_hash(&self, hash: &str) -> Result<Value, FetchError> {
        self.fetch_one(Endpoint::VersionByHash, FetchParams::by_id(hash))
            .await
    }

    /// Fetch a parent model record by id.
    pub async fn model(&self, id: &str) -> Result<Value, FetchError> {
        self.fetch_one(Endpoint::Model, FetchParams::by_id(id)).await
    }

    /// Fetch a version record by id.
    pub async fn version(&self, id: &str) -> Result<Value, FetchError> {
        self.fetch_one(Endpoint::Version, FetchParams::by_id(id))
            .await
    }

    /// Drop one cached response (both tiers).
    pub fn invalidate(&self, cache_key: &str) {
        self.cache.invalidate(cache_key);
    }

    /// Drop every cached negative result, forcing known-absent lookups
    /// to be re-attempted.
    pub fn clear_negative_cache(&self) -> usize {
        self.cache.clear_negative()
    }

    /// Shared cache handle (read-mostly; used by callers that persist
    /// derived artifacts).
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Current adaptive chunk size (observability).
    pub fn batch_chunk_size(&self) -> usize {
        self.coordinator.chunk_size()
    }

    /// URL the client would request for the given call; handy for
    /// callers constructing cache keys out of band.
    pub fn url_for(&self, endpoint: Endpoint, params: &FetchParams) -> String {
        self.executor.url_for(endpoint, params)
    }
}
