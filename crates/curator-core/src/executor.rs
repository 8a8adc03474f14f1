//! Single-call request execution: gate, limit, call, classify, retry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::FetchError;
use crate::http::{HttpClient, HttpErrorKind, HttpRequest, HttpResponse};
use crate::rate_limit::EndpointRateLimiter;
use crate::retry::Backoff;

/// Parameters of one logical fetch: an optional path id plus query pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchParams {
    pub id: Option<String>,
    pub query: BTreeMap<String, String>,
}

impl FetchParams {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            query: BTreeMap::new(),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Stable fragment for cache keys (query pairs are sorted by the
    /// BTreeMap, so equal params always produce equal keys).
    pub fn cache_fragment(&self) -> String {
        let mut fragment = self.id.clone().unwrap_or_default();
        for (name, value) in &self.query {
            fragment.push('&');
            fragment.push_str(name);
            fragment.push('=');
            fragment.push_str(value);
        }
        fragment
    }
}

/// Executes one metadata request against the remote registry.
///
/// Order per call: circuit gate (fail fast), then a rate-limit token,
/// then the HTTP attempt with its per-call timeout, then
/// classification of the response. Transient
/// failures (timeout, 429, 5xx, network) retry up to the configured
/// budget with exponential backoff; a 429 `Retry-After` hint overrides
/// the computed delay. Every attempt's outcome is reported to the
/// breaker; `NotFound` counts as a success because the upstream
/// answered authoritatively.
pub struct RequestExecutor {
    http: Arc<dyn HttpClient>,
    limiter: Arc<EndpointRateLimiter>,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    backoff: Backoff,
    base_url: String,
    api_key: Option<String>,
    user_agent: String,
    timeout: Duration,
}

impl RequestExecutor {
    pub fn new(
        http: Arc<dyn HttpClient>,
        limiter: Arc<EndpointRateLimiter>,
        breaker: Arc<CircuitBreaker>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            http,
            limiter,
            breaker,
            max_retries: config.retry.max_retries,
            backoff: Backoff::from_retry(config.retry),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            user_agent: config.user_agent.clone(),
            timeout: config.timeout,
        }
    }

    /// Full URL for a request, with percent-encoded path id and query.
    pub fn url_for(&self, endpoint: Endpoint, params: &FetchParams) -> String {
        let mut url = format!("{}/{}", self.base_url, endpoint.path());
        if let Some(id) = &params.id {
            url.push('/');
            url.push_str(&urlencoding::encode(id));
        }
        let mut first = true;
        for (name, value) in &params.query {
            url.push(if first { '?' } else { '&' });
            first = false;
            url.push_str(&urlencoding::encode(name));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    pub async fn execute(
        &self,
        endpoint: Endpoint,
        params: &FetchParams,
    ) -> Result<Value, FetchError> {
        self.breaker.try_acquire(endpoint)?;
        self.limiter.acquire(endpoint).await;

        let url = self.url_for(endpoint, params);
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(&url).await {
                Ok(value) => {
                    self.breaker.record_success(endpoint);
                    return Ok(value);
                }
                Err(FetchError::NotFound) => {
                    // The service answered; absence is not an outage.
                    self.breaker.record_success(endpoint);
                    return Err(FetchError::NotFound);
                }
                Err(error) => {
                    self.breaker.record_failure(endpoint);
                    if !(error.is_transient() && attempt < self.max_retries) {
                        return Err(error);
                    }
                    let delay = match &error {
                        FetchError::RateLimited {
                            retry_after: Some(hint),
                        } => *hint,
                        _ => self.backoff.delay(attempt),
                    };
                    warn!(
                        %endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<Value, FetchError> {
        let mut request = HttpRequest::get(url)
            .with_timeout(self.timeout)
            .with_header("accept", "application/json")
            .with_header("user-agent", &self.user_agent);
        if let Some(key) = &self.api_key {
            request = request.with_header("authorization", format!("Bearer {key}"));
        }

        let response = self.http.execute(request).await.map_err(|e| match e.kind {
            HttpErrorKind::Timeout => FetchError::Timeout,
            HttpErrorKind::Connect | HttpErrorKind::Other => FetchError::Network(e.message),
        })?;

        Self::classify(response)
    }

    fn classify(response: HttpResponse) -> Result<Value, FetchError> {
        match response.status {
            status if response.is_success() => {
                serde_json::from_str(&response.body).map_err(|e| {
                    debug!(status, "unparseable upstream body");
                    FetchError::Network(format!("invalid json body: {e}"))
                })
            }
            404 => Err(FetchError::NotFound),
            429 => Err(FetchError::RateLimited {
                retry_after: response.retry_after,
            }),
            status if status >= 500 => Err(FetchError::ServerError { status }),
            status => Err(FetchError::ClientError { status }),
        }
    }
}
