//! HTTP transport abstraction.
//!
//! The executor talks to a [`HttpClient`] trait object so that tests can
//! script responses deterministically while production uses reqwest.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outgoing request envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, when the upstream sent one.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::with_status(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport-level failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Transport-level error (no HTTP status was obtained).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub kind: HttpErrorKind,
    pub message: String,
}

impl HttpError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Other,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Object-safe async transport contract.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(reqwest::Client::new()),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self.client.get(&request.url).timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::timeout(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    HttpError::connect(format!("connection failed: {e}"))
                } else {
                    HttpError::other(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response
                .text()
                .await
                .map_err(|e| HttpError::other(format!("failed to read response body: {e}")))?;

            Ok(HttpResponse {
                status,
                body,
                retry_after,
            })
        })
    }
}

type Scripted = Result<HttpResponse, HttpError>;

#[derive(Debug, Default)]
struct ScriptInner {
    /// (url substring, responses). The first matching rule answers;
    /// queued responses pop in order and the final one repeats.
    rules: Vec<(String, VecDeque<Scripted>)>,
    calls: Vec<String>,
}

/// Deterministic in-process transport for tests.
///
/// Routes by URL substring. Each rule holds a queue of responses; the
/// last response in a queue repeats once the rest are consumed, so a
/// "fail twice then succeed" script is three pushes.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    inner: Mutex<ScriptInner>,
    call_count: AtomicUsize,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, url_fragment: impl Into<String>, response: Scripted) {
        let fragment = url_fragment.into();
        let mut inner = self.inner.lock().expect("script lock not poisoned");
        if let Some((_, queue)) = inner.rules.iter_mut().find(|(f, _)| *f == fragment) {
            queue.push_back(response);
        } else {
            inner.rules.push((fragment, VecDeque::from([response])));
        }
    }

    pub fn push_json(&self, url_fragment: impl Into<String>, body: impl Into<String>) {
        self.push(url_fragment, Ok(HttpResponse::ok_json(body)));
    }

    pub fn push_status(&self, url_fragment: impl Into<String>, status: u16) {
        self.push(url_fragment, Ok(HttpResponse::with_status(status, "")));
    }

    /// Total requests seen.
    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests whose URL contains `fragment`.
    pub fn calls_matching(&self, fragment: &str) -> usize {
        self.inner
            .lock()
            .expect("script lock not poisoned")
            .calls
            .iter()
            .filter(|url| url.contains(fragment))
            .count()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut inner = self.inner.lock().expect("script lock not poisoned");
            inner.calls.push(request.url.clone());

            let matched = inner
                .rules
                .iter_mut()
                .find(|(fragment, _)| request.url.contains(fragment.as_str()));
            match matched {
                Some((_, queue)) => {
                    if queue.len() > 1 {
                        queue.pop_front().expect("queue checked non-empty")
                    } else {
                        queue.front().cloned().expect("queue checked non-empty")
                    }
                }
                None => Ok(HttpResponse::ok_json("{}")),
            }
        })
    }
}
