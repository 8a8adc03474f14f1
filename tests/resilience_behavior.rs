//! Behavior-driven tests for the resilience stack.
//!
//! These tests verify HOW the client behaves when the upstream is
//! rate-limited, failing, or missing records: fail-fast circuits,
//! bounded retries, exact-rate token spending, and single-flight
//! deduplication.

use std::sync::Arc;
use std::time::{Duration, Instant};

use curator_core::{
    CacheMode, CancelToken, EnrichItem, Endpoint, FetchError, FetchParams, HttpClient, HttpError,
    HttpRequest, HttpResponse, MetadataClient, RetryConfig,
};
use curator_tests::{scripted_client, test_config};
use serde_json::json;

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn when_the_burst_budget_is_spent_calls_are_paced_to_the_refill_rate() {
    // Given: a bucket of 5 tokens refilling at 5/s on one endpoint
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(dir.path());
    config.rate_limit = curator_core::RateLimitConfig {
        count: 5,
        per: curator_core::RatePer::Second,
    };
    let (http, client) = scripted_client(config);
    http.push_json("model-versions/by-hash", r#"{"id": 1}"#);

    // When: 8 distinct lookups are made back to back (cache can't help)
    let start = Instant::now();
    for n in 0..8 {
        client
            .version_by_hash(&format!("hash-{n}"))
            .await
            .expect("lookup succeeds");
    }

    // Then: the 3 over-budget calls wait for refill, >= (8-5)/5 s total
    assert!(
        start.elapsed() >= Duration::from_millis(500),
        "8 calls against a 5-token bucket at 5/s took only {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn when_a_429_carries_retry_after_the_executor_waits_and_retries() {
    // Given: an upstream that rate-limits once, then recovers
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(dir.path());
    config.retry = RetryConfig {
        max_retries: 1,
        base_delay: Duration::from_millis(5),
    };
    let (http, client) = scripted_client(config);
    http.push(
        "models/9",
        Ok(HttpResponse {
            status: 429,
            body: String::new(),
            retry_after: Some(Duration::from_millis(30)),
        }),
    );
    http.push_json("models/9", r#"{"id": 9}"#);

    // When: the model is fetched
    let start = Instant::now();
    let value = client.model("9").await.expect("second attempt succeeds");

    // Then: the hinted delay was honored and the retry succeeded
    assert_eq!(value["id"], 9);
    assert_eq!(http.calls(), 2);
    assert!(start.elapsed() >= Duration::from_millis(30));
}

// =============================================================================
// Circuit breaking
// =============================================================================

#[tokio::test]
async fn when_an_endpoint_keeps_failing_the_circuit_opens_and_fails_fast() {
    // Given: failure_threshold=3 and a permanently broken endpoint
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(dir.path());
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.reset_timeout = Duration::from_secs(60);
    let (http, client) = scripted_client(config);
    http.push_status("models", 500);

    // When: three fetches fail
    for n in 0..3 {
        let error = client.model(&format!("{n}")).await.expect_err("upstream down");
        assert_eq!(error, FetchError::ServerError { status: 500 });
    }

    // Then: the fourth fails fast with CircuitOpen and no network call
    let calls_before = http.calls();
    let error = client.model("next").await.expect_err("circuit open");
    assert!(matches!(error, FetchError::CircuitOpen { .. }));
    assert_eq!(http.calls(), calls_before);
}

#[tokio::test]
async fn when_one_endpoint_trips_other_endpoints_keep_working() {
    // Given: the model endpoint is down, the hash endpoint is healthy
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(dir.path());
    config.circuit_breaker.failure_threshold = 1;
    let (http, client) = scripted_client(config);
    http.push_status("models", 500);
    http.push_json("model-versions/by-hash", r#"{"id": 1}"#);

    // When: the model circuit opens
    let _ = client.model("1").await;
    assert!(matches!(
        client.model("2").await,
        Err(FetchError::CircuitOpen { .. })
    ));

    // Then: hash lookups are unaffected
    client.version_by_hash("abc").await.expect("other endpoint healthy");
}

#[tokio::test]
async fn when_the_reset_timeout_elapses_a_single_trial_can_close_the_circuit() {
    // Given: an open circuit with a short reset timeout
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(dir.path());
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.reset_timeout = Duration::from_millis(30);
    let (http, client) = scripted_client(config);
    http.push_status("models/1", 500);
    http.push_json("models/1", r#"{"id": 1}"#);

    let _ = client.model("1").await;
    assert!(matches!(
        client.model("1").await,
        Err(FetchError::CircuitOpen { .. })
    ));

    // When: the timeout elapses and a trial request succeeds
    tokio::time::sleep(Duration::from_millis(40)).await;
    let value = client.model("1").await.expect("half-open trial succeeds");

    // Then: the circuit is closed again and traffic flows
    assert_eq!(value["id"], 1);
    client
        .fetch_one_with(Endpoint::Model, FetchParams::by_id("1"), CacheMode::Refresh)
        .await
        .expect("circuit closed");
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn when_transient_errors_exhaust_the_budget_the_error_surfaces() {
    // Given: a retry budget of 2 against a connection that always drops
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(dir.path());
    config.retry = RetryConfig {
        max_retries: 2,
        base_delay: Duration::from_millis(2),
    };
    let (http, client) = scripted_client(config);
    http.push("images", Err(HttpError::connect("connection reset")));

    // When: the listing is fetched
    let error = client
        .fetch_one(Endpoint::Images, FetchParams::default())
        .await
        .expect_err("network is down");

    // Then: 1 initial + 2 retries were attempted, then the error surfaced
    assert!(matches!(error, FetchError::Network(_)));
    assert_eq!(http.calls(), 3);
}

// =============================================================================
// Single-flight deduplication
// =============================================================================

#[tokio::test]
async fn when_fifty_callers_want_one_parent_exactly_one_call_is_made() {
    // Given: 50 concurrent enrich calls sharing one dedup key
    let dir = tempfile::tempdir().expect("temp dir");
    let (http, client) = scripted_client(test_config(dir.path()));
    http.push_json("models/77", r#"{"id": 77, "name": "shared parent"}"#);
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for caller in 0..50 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            client
                .enrich(vec![EnrichItem::new(format!("file-{caller}"), "77")])
                .await
        }));
    }

    // When: they all complete
    let mut values = Vec::new();
    for task in tasks {
        let enriched = task.await.expect("enrich completes");
        values.push(enriched.into_values().next().expect("enriched value"));
    }

    // Then: one underlying request served all 50 identical results
    assert_eq!(http.calls_matching("models/77"), 1);
    assert_eq!(values.len(), 50);
    assert!(values.iter().all(|v| *v == json!({"id": 77, "name": "shared parent"})));
}

#[tokio::test]
async fn when_a_parent_is_absent_repeat_runs_make_no_further_calls() {
    // Given: a parent that was deleted upstream (404)
    let dir = tempfile::tempdir().expect("temp dir");
    let (http, client) = scripted_client(test_config(dir.path()));
    http.push_status("models/404", 404);

    let items = vec![
        EnrichItem::new("file-a", "404"),
        EnrichItem::new("file-b", "404"),
    ];

    // When: the same enrichment runs three times
    for _ in 0..3 {
        let enriched = client.enrich(items.clone()).await;
        assert!(enriched.is_empty());
    }

    // Then: only the first run touched the network (negative cache)
    assert_eq!(http.calls_matching("models/404"), 1);

    // And: clearing the negative cache re-enables the lookup
    assert_eq!(client.clear_negative_cache(), 1);
    let _ = client.enrich(items).await;
    assert_eq!(http.calls_matching("models/404"), 2);
}

/// Transport that answers every request with the same payload after a
/// fixed delay, so callers can be aborted while a fetch is in flight.
struct DelayedTransport {
    delay: Duration,
}

impl HttpClient for DelayedTransport {
    fn execute<'a>(
        &'a self,
        _request: HttpRequest,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>,
    > {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(HttpResponse::ok_json(r#"{"id": 5}"#))
        })
    }
}

#[tokio::test]
async fn when_a_leading_caller_is_aborted_the_next_caller_still_completes() {
    // Given: a slow upstream and an enrich leader aborted mid-flight
    let dir = tempfile::tempdir().expect("temp dir");
    let client = Arc::new(
        MetadataClient::with_transport(
            test_config(dir.path()),
            Arc::new(DelayedTransport {
                delay: Duration::from_millis(400),
            }) as Arc<dyn HttpClient>,
        )
        .expect("valid config"),
    );

    let leader = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.enrich(vec![EnrichItem::new("file-a", "5")]).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    leader.abort();
    assert!(leader.await.expect_err("task was aborted").is_cancelled());

    // When: a second caller asks for the same parent afterwards
    let enriched = tokio::time::timeout(
        Duration::from_secs(2),
        client.enrich(vec![EnrichItem::new("file-b", "5")]),
    )
    .await
    .expect("an aborted leader must release its in-flight entry");

    // Then: the parent is fetched and delivered normally
    assert_eq!(enriched["file-b"]["id"], 5);
}

#[tokio::test]
async fn when_items_span_many_parents_each_parent_is_fetched_once() {
    // Given: 6 files across 2 parents
    let dir = tempfile::tempdir().expect("temp dir");
    let (http, client) = scripted_client(test_config(dir.path()));
    http.push_json("models/1", r#"{"id": 1}"#);
    http.push_json("models/2", r#"{"id": 2}"#);

    let items = vec![
        EnrichItem::new("a", "1"),
        EnrichItem::new("b", "1"),
        EnrichItem::new("c", "1"),
        EnrichItem::new("d", "2"),
        EnrichItem::new("e", "2"),
        EnrichItem::new("f", "2"),
    ];

    // When: the batch is enriched
    let enriched = client
        .enrich_with(items, CacheMode::Use, &CancelToken::new())
        .await;

    // Then: 6 results from 2 calls, routed to the right parents
    assert_eq!(enriched.len(), 6);
    assert_eq!(http.calls(), 2);
    assert_eq!(enriched["b"]["id"], 1);
    assert_eq!(enriched["f"]["id"], 2);
}
