//! Shared outbound-call base (spec §4.7), grounded on the header-injection /
//! POST-and-check-status shape of `crates/anthropic/src/driver.rs`, generalized
//! to non-streaming request/response and wired through the reliability crate's
//! [`RateLimiter`] and [`RetryPolicy`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chapterforge_core::EngineError;
use chapterforge_reliability::{RateLimiter, RetryPolicy};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Per-client counters surfaced for telemetry (spec §4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientStats {
    pub request_count: u64,
    pub failure_count: u64,
    pub total_latency: Duration,
}

impl ClientStats {
    pub fn failure_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.request_count as f64
        }
    }

    pub fn average_latency(&self) -> Duration {
        if self.request_count == 0 {
            Duration::ZERO
        } else {
            self.total_latency / self.request_count as u32
        }
    }
}

struct StatsCounters {
    request_count: AtomicU64,
    failure_count: AtomicU64,
    total_latency_micros: AtomicU64,
}

impl Default for StatsCounters {
    fn default() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_latency_micros: AtomicU64::new(0),
        }
    }
}

/// Shared base for every outbound collaborator: LM generators, the object
/// store, the VCS sink, the chat sink. Specializations differ only in base
/// URL, auth scheme, and request/response shape (spec §4.7).
pub struct ServiceClient {
    http: Client,
    base_url: String,
    auth_header: Option<(String, String)>,
    user_agent: String,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    timeout: Duration,
    stats: StatsCounters,
}

impl ServiceClient {
    pub fn new(
        base_url: impl Into<String>,
        service_name: impl Into<String>,
        requests_per_minute: u32,
        timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        let service_name = service_name.into();
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            auth_header: None,
            user_agent: format!("chapterforge/{}", env!("CARGO_PKG_VERSION")),
            rate_limiter: RateLimiter::new(requests_per_minute, service_name),
            retry_policy,
            timeout,
            stats: StatsCounters::default(),
        }
    }

    /// Attach a header pair injected on every outgoing request, e.g.
    /// `("x-api-key", key)` or `("Authorization", format!("Bearer {key}"))`.
    pub fn with_auth_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_header = Some((name.into(), value.into()));
        self
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            request_count: self.stats.request_count.load(Ordering::Relaxed),
            failure_count: self.stats.failure_count.load(Ordering::Relaxed),
            total_latency: Duration::from_micros(
                self.stats.total_latency_micros.load(Ordering::Relaxed),
            ),
        }
    }

    pub async fn rate_limiter_stats(&self) -> chapterforge_reliability::RateLimiterStats {
        self.rate_limiter.stats().await
    }

    /// Issue a JSON request/response call, applying rate-limit admission and
    /// the retry policy on classified transient failures. `path` is joined to
    /// the client's base URL.
    pub async fn call_json<Req, Resp>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Req>,
    ) -> Result<Resp, EngineError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.rate_limiter.acquire().await;

            let start = Instant::now();
            let result = self.send_once(method.clone(), &url, body).await;
            let elapsed = start.elapsed();

            self.stats.request_count.fetch_add(1, Ordering::Relaxed);
            self.stats
                .total_latency_micros
                .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

            match result {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    self.stats.failure_count.fetch_add(1, Ordering::Relaxed);
                    let retryable = err.is_retryable()
                        && self.retry_policy.has_attempts_remaining(attempt);
                    if !retryable {
                        warn!(url = %url, attempt, error = %err, "service call failed, not retrying");
                        return Err(err);
                    }
                    let delay = self.retry_policy.delay_for_attempt(attempt + 1);
                    debug!(url = %url, attempt, delay_ms = delay.as_millis(), "retrying service call");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send_once<Req, Resp>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Req>,
    ) -> Result<Resp, EngineError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut request = self
            .http
            .request(method, url)
            .timeout(self.timeout)
            .header("User-Agent", &self.user_agent);

        if let Some((name, value)) = &self.auth_header {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<Resp>()
                .await
                .map_err(|e| EngineError::validation(format!("malformed response body: {e}")))
        } else {
            let body_text = response.text().await.ok();
            Err(EngineError::from_status(
                status.as_u16(),
                body_text.clone(),
                status_message(status, body_text.as_deref()),
            ))
        }
    }
}

fn status_message(status: StatusCode, body: Option<&str>) -> String {
    match body {
        Some(body) if !body.is_empty() => format!("{status}: {body}"),
        _ => status.to_string(),
    }
}

fn classify_transport_error(err: &reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::transient(format!("request timed out: {err}"))
    } else if err.is_connect() {
        EngineError::transient(format!("connection failed: {err}"))
    } else {
        EngineError::transient(format!("network error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: String) -> ServiceClient {
        ServiceClient::new(
            base_url,
            "test-service",
            1000,
            Duration::from_secs(5),
            RetryPolicy::exponential(),
        )
        .with_auth_header("x-api-key", "secret")
    }

    #[tokio::test]
    async fn successful_call_deserializes_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let client = client(server.uri());
        let resp: serde_json::Value = client
            .call_json(Method::POST, "/echo", Some(&json!({"hello": "world"})))
            .await
            .unwrap();
        assert_eq!(resp["ok"], true);
        assert_eq!(client.stats().request_count, 1);
        assert_eq!(client.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let client = client(server.uri());
        let result: Result<serde_json::Value, _> = client
            .call_json(Method::POST, "/bad", Some(&json!({})))
            .await;
        assert!(result.is_err());
        assert_eq!(client.stats().request_count, 1);
    }

    #[tokio::test]
    async fn server_error_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let fast_retry = ServiceClient::new(
            server.uri(),
            "flaky-service",
            1000,
            Duration::from_secs(5),
            RetryPolicy::fixed(Duration::from_millis(1), 3),
        );
        let resp: serde_json::Value = fast_retry
            .call_json(Method::POST, "/flaky", Some(&json!({})))
            .await
            .unwrap();
        assert_eq!(resp["ok"], true);
        assert_eq!(fast_retry.stats().request_count, 2);
        assert_eq!(fast_retry.stats().failure_count, 1);
    }
}
