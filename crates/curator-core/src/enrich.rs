//! Deduplicating enrichment: many items, one fetch per parent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use curator_cache::CacheMode;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::batch::{BatchCoordinator, CancelToken, FetchRequest};
use crate::endpoint::Endpoint;
use crate::error::FetchError;
use crate::executor::FetchParams;

/// One item to enrich: a caller-visible key plus the shared parent key
/// it should be enriched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichItem {
    /// Key the result is reported under (e.g. a file path).
    pub primary_key: String,
    /// Grouping key naming the shared parent record (e.g. a model id).
    pub dedup_key: String,
}

impl EnrichItem {
    pub fn new(primary_key: impl Into<String>, dedup_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            dedup_key: dedup_key.into(),
        }
    }
}

/// Terminal outcome of one dedup key's fetch, fanned out to waiters.
#[derive(Debug, Clone)]
enum Outcome {
    Found(Value),
    Absent,
    Failed(FetchError),
}

type FlightSender = Arc<watch::Sender<Option<Outcome>>>;

enum Role {
    Lead(FlightSender),
    Attach(watch::Receiver<Option<Outcome>>),
}

/// Removes a led key from the registry when the leader's span ends,
/// whether it ran to completion or its future was dropped mid-flight.
/// Removal drops the registry's sender clone, so once the leader's own
/// clone goes too the channel closes and attached waiters wake.
struct FlightGuard<'a> {
    inflight: &'a Mutex<HashMap<String, FlightSender>>,
    dedup_key: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(&self.dedup_key);
        }
    }
}

/// Collapses concurrent fetches for the same parent into one call.
///
/// The in-flight registry maps each dedup key to its result broadcaster
/// and is the single source of truth: the insert-if-absent check under
/// its lock decides exactly one leader per key, and every other caller
/// attaches to the leader's result. Each entry is scoped to its leader
/// by a drop guard, so a leader whose future is dropped mid-flight
/// releases the key rather than wedging later callers. Negative results
/// flow through the coordinator's cache with the long negative TTL, so
/// repeated runs do not re-attempt known-absent parents.
pub struct Enricher {
    coordinator: Arc<BatchCoordinator>,
    endpoint: Endpoint,
    inflight: Mutex<HashMap<String, FlightSender>>,
}

impl Enricher {
    pub fn new(coordinator: Arc<BatchCoordinator>, endpoint: Endpoint) -> Self {
        Self {
            coordinator,
            endpoint,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the parent record for every unique dedup key (at most one
    /// in-flight call per key, across concurrent `enrich` invocations)
    /// and fan results out to every primary key. Absent parents and
    /// failed fetches are simply missing from the returned map.
    pub async fn enrich(
        &self,
        items: Vec<EnrichItem>,
        mode: CacheMode,
        cancel: &CancelToken,
    ) -> HashMap<String, Value> {
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for item in items {
            groups.entry(item.dedup_key).or_default().push(item.primary_key);
        }
        if groups.is_empty() {
            return HashMap::new();
        }

        // Atomic insert-if-absent decides one leader per dedup key.
        let mut led: Vec<(String, FlightSender)> = Vec::new();
        let mut attached: Vec<(String, watch::Receiver<Option<Outcome>>)> = Vec::new();
        let mut guards: Vec<FlightGuard<'_>> = Vec::new();
        {
            let mut inflight = self.inflight.lock().expect("in-flight registry lock not poisoned");
            for dedup_key in groups.keys() {
                match self.claim(&mut inflight, dedup_key) {
                    Role::Lead(sender) => {
                        guards.push(FlightGuard {
                            inflight: &self.inflight,
                            dedup_key: dedup_key.clone(),
                        });
                        led.push((dedup_key.clone(), sender));
                    }
                    Role::Attach(receiver) => attached.push((dedup_key.clone(), receiver)),
                }
            }
        }
        debug!(
            unique = groups.len(),
            leading = led.len(),
            attaching = attached.len(),
            "enriching parent records"
        );

        let mut outcomes: HashMap<String, Outcome> = HashMap::new();

        if !led.is_empty() {
            let requests: Vec<FetchRequest> = led
                .iter()
                .map(|(dedup_key, _)| {
                    FetchRequest::new(
                        dedup_key.clone(),
                        self.endpoint,
                        FetchParams::by_id(dedup_key.clone()),
                    )
                })
                .collect();
            let mut batch = self.coordinator.run(requests, mode, cancel).await;

            for (dedup_key, sender) in led {
                let outcome = if let Some(value) = batch.successes.remove(&dedup_key) {
                    Outcome::Found(value)
                } else {
                    match batch.failures.remove(&dedup_key) {
                        Some(FetchError::NotFound) => Outcome::Absent,
                        Some(error) => Outcome::Failed(error),
                        // Item never started (cancelled mid-batch).
                        None => Outcome::Failed(FetchError::Cancelled),
                    }
                };
                sender.send_replace(Some(outcome.clone()));
                outcomes.insert(dedup_key, outcome);
            }
        }
        // Every led outcome has been broadcast; free the keys.
        drop(guards);

        for (dedup_key, mut receiver) in attached {
            let outcome = loop {
                if let Some(outcome) = receiver.borrow_and_update().clone() {
                    break outcome;
                }
                if receiver.changed().await.is_err() {
                    break Outcome::Failed(FetchError::Cancelled);
                }
            };
            outcomes.insert(dedup_key, outcome);
        }

        let mut enriched = HashMap::new();
        for (dedup_key, primary_keys) in groups {
            if let Some(Outcome::Found(value)) = outcomes.get(&dedup_key) {
                for primary_key in primary_keys {
                    enriched.insert(primary_key, value.clone());
                }
            }
        }
        enriched
    }

    fn claim(&self, inflight: &mut HashMap<String, FlightSender>, dedup_key: &str) -> Role {
        match inflight.get(dedup_key) {
            Some(sender) => Role::Attach(sender.subscribe()),
            None => {
                let (sender, _) = watch::channel(None);
                let sender = Arc::new(sender);
                inflight.insert(dedup_key.to_owned(), Arc::clone(&sender));
                Role::Lead(sender)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::config::{ClientConfig, RatePer, RateLimitConfig, RetryConfig};
    use crate::executor::RequestExecutor;
    use crate::http::ScriptedHttpClient;
    use crate::rate_limit::EndpointRateLimiter;
    use curator_cache::TieredCache;
    use serde_json::json;
    use std::time::Duration;

    fn harness(dir: &std::path::Path) -> (Arc<ScriptedHttpClient>, Arc<Enricher>) {
        let mut config = ClientConfig::default();
        config.base_url = String::from("https://registry.test/api/v1");
        config.cache.disk_dir = dir.to_path_buf();
        config.rate_limit = RateLimitConfig {
            count: 1_000,
            per: RatePer::Second,
        };
        config.retry = RetryConfig {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        };

        let http = Arc::new(ScriptedHttpClient::new());
        let executor = Arc::new(RequestExecutor::new(
            Arc::clone(&http) as Arc<dyn crate::http::HttpClient>,
            Arc::new(EndpointRateLimiter::new(config.rate_limit)),
            Arc::new(CircuitBreaker::new(config.circuit_breaker)),
            &config,
        ));
        let cache = Arc::new(TieredCache::open(32, dir).expect("cache opens"));
        let coordinator = Arc::new(BatchCoordinator::new(executor, cache, &config));
        let enricher = Arc::new(Enricher::new(coordinator, Endpoint::Model));
        (http, enricher)
    }

    #[tokio::test]
    async fn shared_parent_is_fetched_once_and_fanned_out() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (http, enricher) = harness(dir.path());
        http.push_json("models/7", r#"{"id": 7, "name": "parent"}"#);

        let items = vec![
            EnrichItem::new("file-a", "7"),
            EnrichItem::new("file-b", "7"),
            EnrichItem::new("file-c", "7"),
        ];
        let enriched = enricher.enrich(items, CacheMode::Use, &CancelToken::new()).await;

        assert_eq!(http.calls_matching("models/7"), 1);
        assert_eq!(enriched.len(), 3);
        assert_eq!(enriched["file-a"], json!({"id": 7, "name": "parent"}));
        assert_eq!(enriched["file-a"], enriched["file-c"]);
    }

    #[tokio::test]
    async fn absent_parent_is_cached_negatively() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (http, enricher) = harness(dir.path());
        http.push_status("models/404", 404);

        let items = vec![EnrichItem::new("file-a", "404")];
        let first = enricher
            .enrich(items.clone(), CacheMode::Use, &CancelToken::new())
            .await;
        assert!(first.is_empty());
        assert_eq!(http.calls_matching("models/404"), 1);

        // Repeat run inside the negative TTL window: zero new calls.
        let second = enricher.enrich(items, CacheMode::Use, &CancelToken::new()).await;
        assert!(second.is_empty());
        assert_eq!(http.calls_matching("models/404"), 1);
    }

    #[tokio::test]
    async fn concurrent_enrich_calls_share_one_flight() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (http, enricher) = harness(dir.path());
        http.push_json("models/3", r#"{"id": 3}"#);

        let mut tasks = Vec::new();
        for caller in 0..50 {
            let enricher = Arc::clone(&enricher);
            tasks.push(tokio::spawn(async move {
                enricher
                    .enrich(
                        vec![EnrichItem::new(format!("file-{caller}"), "3")],
                        CacheMode::Use,
                        &CancelToken::new(),
                    )
                    .await
            }));
        }

        let mut values = Vec::new();
        for task in tasks {
            let enriched = task.await.expect("enrich task completes");
            values.push(enriched.into_values().next().expect("value present"));
        }

        assert_eq!(http.calls_matching("models/3"), 1, "single underlying call");
        assert!(values.iter().all(|v| *v == json!({"id": 3})));
    }

    #[tokio::test]
    async fn failed_parent_fetch_omits_items_without_aborting_others() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (http, enricher) = harness(dir.path());
        http.push_json("models/1", r#"{"id": 1}"#);
        http.push_status("models/2", 500);

        let items = vec![
            EnrichItem::new("good", "1"),
            EnrichItem::new("bad", "2"),
        ];
        let enriched = enricher.enrich(items, CacheMode::Use, &CancelToken::new()).await;

        assert_eq!(enriched.len(), 1);
        assert!(enriched.contains_key("good"));
        assert!(!enriched.contains_key("bad"));
    }
}
