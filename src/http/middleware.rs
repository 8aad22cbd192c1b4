//! Admission middleware for axum.
//!
//! For every request: derive the client key, consult the skip predicate,
//! account for the request, then either forward it with rate limit headers
//! or answer `429 Too Many Requests` without calling the inner handler.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tracing::{instrument, trace, warn};

use super::hooks::{ErrorResponse, KeyExtractor, NeverSkip, ProxyHeaderKey, SkipPaths, SkipPredicate};
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::ratelimit::{CounterStore, MemoryStore, RateLimitHeaders, RateLimiter};

/// `RateLimit-Limit` response header.
pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
/// `RateLimit-Remaining` response header.
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
/// `RateLimit-Reset` response header.
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// One configured admission policy: a limiter plus the hooks around it.
///
/// Each instance owns its limiter, so differently configured policies can
/// guard different routes of the same application.
pub struct Admission<S: CounterStore = MemoryStore> {
    limiter: Arc<RateLimiter<S>>,
    key_extractor: Arc<dyn KeyExtractor>,
    skip: Arc<dyn SkipPredicate>,
    error_response: ErrorResponse,
}

impl Admission<MemoryStore> {
    /// Build an admission policy from configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::from_config(config)?);
        let admission = Self::new(limiter).with_key_extractor(ProxyHeaderKey::new(config.trust_proxy));

        if config.skip_paths.is_empty() {
            Ok(admission)
        } else {
            Ok(admission.with_skip(SkipPaths::new(config.skip_paths.iter().cloned())))
        }
    }
}

impl<S: CounterStore> Admission<S> {
    /// Create an admission policy around `limiter` with default hooks: keys
    /// from the socket peer, nothing skipped, a JSON error body.
    pub fn new(limiter: Arc<RateLimiter<S>>) -> Self {
        Self {
            limiter,
            key_extractor: Arc::new(ProxyHeaderKey::default()),
            skip: Arc::new(NeverSkip),
            error_response: ErrorResponse::default(),
        }
    }

    /// Replace the key extractor.
    pub fn with_key_extractor(mut self, extractor: impl KeyExtractor + 'static) -> Self {
        self.key_extractor = Arc::new(extractor);
        self
    }

    /// Replace the skip predicate.
    pub fn with_skip(mut self, skip: impl SkipPredicate + 'static) -> Self {
        self.skip = Arc::new(skip);
        self
    }

    /// Replace the body sent with rejections.
    pub fn with_error_response(mut self, error_response: impl Into<ErrorResponse>) -> Self {
        self.error_response = error_response.into();
        self
    }

    /// The limiter behind this policy.
    pub fn limiter(&self) -> &Arc<RateLimiter<S>> {
        &self.limiter
    }
}

/// Guard every route of `router` with `admission`.
pub fn protect<S, St>(router: Router<St>, admission: Arc<Admission<S>>) -> Router<St>
where
    S: CounterStore + 'static,
    St: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(admission, enforce::<S>))
}

/// Middleware function enforcing `admission` on one request.
///
/// Key derivation and skip predicate failures are returned as errors so the
/// host's error handling produces the response.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn enforce<S>(
    State(admission): State<Arc<Admission<S>>>,
    request: Request,
    next: Next,
) -> Result<Response>
where
    S: CounterStore + 'static,
{
    let (parts, body) = request.into_parts();
    let key = admission.key_extractor.extract(&parts)?;

    if admission.skip.should_skip(&parts, &key).await? {
        trace!(key = %key, "Skipping rate limit");
        return Ok(next.run(Request::from_parts(parts, body)).await);
    }

    let decision = admission.limiter.check(&key);

    if !decision.admitted {
        warn!(
            key = %key,
            count = decision.counter.count,
            "rate limit exceeded"
        );

        let mut response = admission.error_response.render(&parts);
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        apply_headers(response.headers_mut(), &decision.headers);
        return Ok(response);
    }

    let mut response = next.run(Request::from_parts(parts, body)).await;
    apply_headers(response.headers_mut(), &decision.headers);
    Ok(response)
}

/// Write rate limit headers, plus `Retry-After` when present.
pub fn apply_headers(headers: &mut HeaderMap, values: &RateLimitHeaders) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(values.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(values.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(values.reset));

    if let Some(retry_after) = values.retry_after {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TurnstileError;
    use crate::ratelimit::{ClientKey, ManualClock, WindowPolicy};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::request::Parts;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn limiter(max_requests: u64, window_ms: u64, clock: Arc<ManualClock>) -> Arc<RateLimiter> {
        let policy = WindowPolicy::new(max_requests, Duration::from_millis(window_ms)).unwrap();
        let store = MemoryStore::new(100, Duration::from_secs(3600)).unwrap();
        Arc::new(RateLimiter::new(policy, store).unwrap().with_clock(clock))
    }

    fn app(admission: Admission, hits: Arc<AtomicUsize>) -> Router {
        let router = Router::new().route(
            "/",
            get(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::CREATED, "ok")
                }
            }),
        );
        protect(router, Arc::new(admission))
    }

    async fn send(app: &Router) -> Response {
        app.clone()
            .oneshot(axum::http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn header(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_fixed_window_scenario() {
        let clock = Arc::new(ManualClock::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(Admission::new(limiter(3, 1_000, clock.clone())), hits.clone());

        for expected_remaining in ["2", "1", "0"] {
            let response = send(&app).await;
            assert_eq!(response.status(), StatusCode::CREATED);
            assert_eq!(header(&response, "RateLimit-Limit").as_deref(), Some("3"));
            assert_eq!(
                header(&response, "RateLimit-Remaining").as_deref(),
                Some(expected_remaining)
            );
            assert_eq!(header(&response, "RateLimit-Reset").as_deref(), Some("1"));
            assert_eq!(header(&response, "Retry-After"), None);
        }

        let response = send(&app).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, "RateLimit-Remaining").as_deref(), Some("0"));
        assert_eq!(header(&response, "Retry-After").as_deref(), Some("1"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        clock.set(1_001);
        let response = send(&app).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(header(&response, "RateLimit-Remaining").as_deref(), Some("2"));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_rejections_keep_counting() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(1, 1_000, clock);
        let app = app(Admission::new(limiter.clone()), Arc::new(AtomicUsize::new(0)));

        for _ in 0..4 {
            send(&app).await;
        }

        assert_eq!(limiter.counter_value(&ClientKey::unknown()), Some(4));
    }

    #[tokio::test]
    async fn test_default_error_body() {
        let clock = Arc::new(ManualClock::new(0));
        let app = app(Admission::new(limiter(0, 1_000, clock)), Arc::new(AtomicUsize::new(0)));

        let response = send(&app).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["statusCode"], 429);
        assert_eq!(value["error"], "Too Many Requests");
    }

    #[tokio::test]
    async fn test_custom_error_body() {
        let clock = Arc::new(ManualClock::new(0));
        let admission = Admission::new(limiter(0, 1_000, clock)).with_error_response(
            ErrorResponse::dynamic(|parts: &Parts| ErrorResponse::Text(format!("slow down: {}", parts.uri.path()))),
        );
        let app = app(admission, Arc::new(AtomicUsize::new(0)));

        let response = send(&app).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, "Retry-After").as_deref(), Some("1"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"slow down: /");
    }

    struct AlwaysSkip;

    #[async_trait]
    impl SkipPredicate for AlwaysSkip {
        async fn should_skip(&self, _parts: &Parts, _key: &ClientKey) -> Result<bool> {
            tokio::task::yield_now().await;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_skipped_requests_bypass_accounting() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(1, 1_000, clock);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(Admission::new(limiter.clone()).with_skip(AlwaysSkip), hits.clone());

        for _ in 0..5 {
            let response = send(&app).await;
            assert_eq!(response.status(), StatusCode::CREATED);
            assert_eq!(header(&response, "RateLimit-Limit"), None);
            assert_eq!(header(&response, "RateLimit-Remaining"), None);
            assert_eq!(header(&response, "RateLimit-Reset"), None);
        }

        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert_eq!(limiter.counter_count(), 0);
    }

    struct FailingSkip;

    #[async_trait]
    impl SkipPredicate for FailingSkip {
        async fn should_skip(&self, _parts: &Parts, _key: &ClientKey) -> Result<bool> {
            Err(TurnstileError::SkipPredicate("lookup failed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_skip_failure_propagates() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(5, 1_000, clock);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(Admission::new(limiter.clone()).with_skip(FailingSkip), hits.clone());

        let response = send(&app).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header(&response, "RateLimit-Limit"), None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(limiter.counter_count(), 0);
    }

    #[tokio::test]
    async fn test_key_derivation_failure_propagates() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(5, 1_000, clock);
        let admission = Admission::new(limiter.clone()).with_key_extractor(|_: &Parts| -> Result<ClientKey> {
            Err(TurnstileError::KeyDerivation("no key".to_string()))
        });
        let app = app(admission, Arc::new(AtomicUsize::new(0)));

        let response = send(&app).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(limiter.counter_count(), 0);
    }

    #[tokio::test]
    async fn test_keys_from_header_are_independent() {
        let clock = Arc::new(ManualClock::new(0));
        let admission = Admission::new(limiter(1, 1_000, clock)).with_key_extractor(ProxyHeaderKey::new(true));
        let app = app(admission, Arc::new(AtomicUsize::new(0)));

        let request = |ip: &str| {
            axum::http::Request::get("/")
                .header("x-forwarded-for", ip)
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request("203.0.113.1")).await.unwrap();
        let second = app.clone().oneshot(request("203.0.113.2")).await.unwrap();
        let repeat = app.clone().oneshot(request("203.0.113.1")).await.unwrap();

        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(second.status(), StatusCode::CREATED);
        assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_from_config_skip_paths() {
        let config = RateLimitingConfig {
            max_requests: 1,
            skip_paths: vec!["/health".to_string()],
            ..Default::default()
        };
        let admission = Arc::new(Admission::from_config(&config).unwrap());
        let app = protect(
            Router::new()
                .route("/", get(|| async { "ok" }))
                .route("/health", get(|| async { "healthy" })),
            admission.clone(),
        );

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(axum::http::Request::get("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(admission.limiter().counter_count(), 0);

        let response = send(&app).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = send(&app).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_independent_policies_coexist() {
        let clock = Arc::new(ManualClock::new(0));
        let strict = Arc::new(Admission::new(limiter(1, 1_000, clock.clone())));
        let loose = Arc::new(Admission::new(limiter(10, 1_000, clock)));

        let app = Router::new()
            .merge(protect(Router::new().route("/strict", get(|| async { "ok" })), strict))
            .merge(protect(Router::new().route("/loose", get(|| async { "ok" })), loose));

        let call = |path: &'static str| {
            let app = app.clone();
            async move {
                app.oneshot(axum::http::Request::get(path).body(Body::empty()).unwrap())
                    .await
                    .unwrap()
                    .status()
            }
        };

        assert_eq!(call("/strict").await, StatusCode::OK);
        assert_eq!(call("/strict").await, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(call("/loose").await, StatusCode::OK);
        assert_eq!(call("/loose").await, StatusCode::OK);
    }

    #[test]
    fn test_apply_headers() {
        let mut headers = HeaderMap::new();
        apply_headers(
            &mut headers,
            &RateLimitHeaders {
                limit: 10,
                remaining: 0,
                reset: 1_700_000_000,
                retry_after: Some(60),
            },
        );

        assert_eq!(headers["ratelimit-limit"], "10");
        assert_eq!(headers["ratelimit-remaining"], "0");
        assert_eq!(headers["ratelimit-reset"], "1700000000");
        assert_eq!(headers["retry-after"], "60");
    }
}
