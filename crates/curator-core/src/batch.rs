//! Batch coordination: bounded workers, per-item outcomes, adaptive
//! chunk sizing, cooperative cancellation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use curator_cache::{CacheMode, Lookup, TieredCache};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{BatchConfig, ClientConfig};
use crate::endpoint::Endpoint;
use crate::error::FetchError;
use crate::executor::{FetchParams, RequestExecutor};

/// One logical fetch within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Caller-chosen result key (e.g. a file hash or file path).
    pub key: String,
    pub endpoint: Endpoint,
    pub params: FetchParams,
}

impl FetchRequest {
    pub fn new(key: impl Into<String>, endpoint: Endpoint, params: FetchParams) -> Self {
        Self {
            key: key.into(),
            endpoint,
            params,
        }
    }

    /// Cache identity of the underlying remote call. Distinct from
    /// `key`: two requests with different result keys but identical
    /// endpoint+params share one cache entry.
    pub fn cache_key(&self) -> String {
        format!("GET {} {}", self.endpoint.path(), self.params.cache_fragment())
    }
}

/// Keyed outcome of one coordinator invocation. Immutable once returned.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub successes: HashMap<String, Value>,
    pub failures: HashMap<String, FetchError>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.successes.is_empty() && self.failures.is_empty()
    }
}

/// Level-triggered cooperative cancellation flag.
///
/// Once cancelled, in-flight calls finish but no new items start; the
/// coordinator returns the completed subset.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Chunk-size controller driven by observed success rates.
///
/// Growth consults the rolling mean of recent chunks (a single good
/// chunk after a rough patch should not immediately double the load);
/// shrinking reacts to the latest chunk alone so trouble backs off
/// promptly. Sizes are always clamped to `[min_size, max_size]`.
#[derive(Debug)]
pub struct AdaptiveSizer {
    config: BatchConfig,
    size: usize,
    window: VecDeque<f64>,
}

const RATE_WINDOW: usize = 10;

impl AdaptiveSizer {
    pub fn new(config: BatchConfig) -> Self {
        let size = config.base_size;
        Self {
            config,
            size,
            window: VecDeque::with_capacity(RATE_WINDOW),
        }
    }

    pub fn current(&self) -> usize {
        self.size
    }

    pub fn rolling_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Record one chunk's success rate and adapt the next chunk size.
    pub fn record(&mut self, rate: f64) {
        if self.window.len() == RATE_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(rate);

        let previous = self.size;
        if rate < self.config.scale_down_threshold / 2.0 {
            self.size = (self.size / 4).max(self.config.min_size);
        } else if rate < self.config.scale_down_threshold {
            self.size = (self.size / 2).max(self.config.min_size);
        } else if self.rolling_rate() >= self.config.scale_up_threshold {
            self.size = (self.size * 2).min(self.config.max_size);
        }

        if self.size != previous {
            debug!(
                rate,
                rolling = self.rolling_rate(),
                from = previous,
                to = self.size,
                "adapted batch size"
            );
        }
    }
}

/// Schedules many logical fetches over a bounded worker pool.
///
/// Items run concurrently up to `max_concurrent`; each item's outcome
/// is recorded independently, so one failure never aborts its
/// siblings. Cache, breaker and limiter interactions are all
/// thread-safe under this pool.
pub struct BatchCoordinator {
    executor: Arc<RequestExecutor>,
    cache: Arc<TieredCache>,
    positive_ttl: Duration,
    negative_ttl: Duration,
    semaphore: Arc<Semaphore>,
    sizer: Mutex<AdaptiveSizer>,
}

impl BatchCoordinator {
    pub fn new(
        executor: Arc<RequestExecutor>,
        cache: Arc<TieredCache>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            executor,
            cache,
            positive_ttl: config.cache.positive_ttl,
            negative_ttl: config.cache.negative_ttl,
            semaphore: Arc::new(Semaphore::new(config.batch.max_concurrent)),
            sizer: Mutex::new(AdaptiveSizer::new(config.batch.clone())),
        }
    }

    /// Current adaptive chunk size (exposed for observability).
    pub fn chunk_size(&self) -> usize {
        self.sizer.lock().expect("sizer lock not poisoned").current()
    }

    /// Run every request to completion (or cancellation), returning the
    /// keyed outcome of the completed subset.
    pub async fn run(
        &self,
        requests: Vec<FetchRequest>,
        mode: CacheMode,
        cancel: &CancelToken,
    ) -> BatchResult {
        let mut result = BatchResult::default();
        let mut queue: VecDeque<FetchRequest> = requests.into();

        while !queue.is_empty() {
            if cancel.is_cancelled() {
                debug!(remaining = queue.len(), "batch cancelled, returning partial result");
                break;
            }

            let chunk_size = self.chunk_size().min(queue.len());
            let chunk: Vec<FetchRequest> = queue.drain(..chunk_size).collect();
            let attempted = chunk.len();

            let mut tasks: JoinSet<Option<(String, Result<Value, FetchError>)>> = JoinSet::new();
            for request in chunk {
                let executor = Arc::clone(&self.executor);
                let cache = Arc::clone(&self.cache);
                let semaphore = Arc::clone(&self.semaphore);
                let cancel = cancel.clone();
                let positive_ttl = self.positive_ttl;
                let negative_ttl = self.negative_ttl;
                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let outcome = fetch_through_cache(
                        &executor,
                        &cache,
                        &request,
                        mode,
                        positive_ttl,
                        negative_ttl,
                    )
                    .await;
                    Some((request.key, outcome))
                });
            }

            let mut healthy = 0_usize;
            let mut skipped = 0_usize;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Some((key, Ok(value)))) => {
                        healthy += 1;
                        result.successes.insert(key, value);
                    }
                    Ok(Some((key, Err(error)))) => {
                        // A negative result still means the upstream is
                        // healthy; only real failures should shrink load.
                        if error == FetchError::NotFound {
                            healthy += 1;
                        }
                        result.failures.insert(key, error);
                    }
                    Ok(None) => skipped += 1,
                    Err(join_error) => {
                        warn!(%join_error, "batch worker panicked");
                    }
                }
            }

            let completed = attempted.saturating_sub(skipped);
            if completed > 0 {
                let rate = healthy as f64 / completed as f64;
                self.sizer
                    .lock()
                    .expect("sizer lock not poisoned")
                    .record(rate);
            }
        }

        result
    }
}

/// Cache-aware execution of one request.
async fn fetch_through_cache(
    executor: &RequestExecutor,
    cache: &TieredCache,
    request: &FetchRequest,
    mode: CacheMode,
    positive_ttl: Duration,
    negative_ttl: Duration,
) -> Result<Value, FetchError> {
    let cache_key = request.cache_key();

    if mode == CacheMode::Use {
        match cache.get(&cache_key) {
            Some(Lookup::Positive(value)) => return Ok(value),
            Some(Lookup::Negative) => return Err(FetchError::NotFound),
            None => {}
        }
    }

    match executor.execute(request.endpoint, &request.params).await {
        Ok(value) => {
            if mode != CacheMode::Bypass {
                if let Err(error) = cache.set(&cache_key, value.clone(), positive_ttl, false) {
                    warn!(key = %cache_key, %error, "failed to write cache entry");
                }
            }
            Ok(value)
        }
        Err(FetchError::NotFound) => {
            if mode != CacheMode::Bypass {
                if let Err(error) = cache.set(&cache_key, Value::Null, negative_ttl, true) {
                    warn!(key = %cache_key, %error, "failed to write negative cache entry");
                }
            }
            Err(FetchError::NotFound)
        }
        Err(error) => Err(error),
    }
}
