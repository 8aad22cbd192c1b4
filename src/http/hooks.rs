//! Host-supplied behaviour plugged into the admission middleware.
//!
//! Hooks see the request head ([`Parts`]) only. The body is never read.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::ratelimit::ClientKey;

/// Derives the client key for a request.
///
/// Implementations should be pure and total: when no signal is present they
/// return [`ClientKey::unknown`] rather than failing. An error propagates to
/// the host's error handling unchanged.
pub trait KeyExtractor: Send + Sync {
    /// Derive the key for `parts`.
    fn extract(&self, parts: &Parts) -> Result<ClientKey>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&Parts) -> Result<ClientKey> + Send + Sync,
{
    fn extract(&self, parts: &Parts) -> Result<ClientKey> {
        self(parts)
    }
}

/// Keys requests by client IP.
///
/// With `trust_proxy` set, the first `X-Forwarded-For` entry and then
/// `X-Real-IP` take precedence over the socket peer. Only enable it behind a
/// proxy that overwrites these headers, otherwise clients pick their own key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyHeaderKey {
    trust_proxy: bool,
}

impl ProxyHeaderKey {
    /// Create an extractor.
    pub fn new(trust_proxy: bool) -> Self {
        Self { trust_proxy }
    }

    fn forwarded(parts: &Parts) -> Option<&str> {
        let forwarded_for = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        forwarded_for.or_else(|| {
            parts
                .headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
    }
}

impl KeyExtractor for ProxyHeaderKey {
    fn extract(&self, parts: &Parts) -> Result<ClientKey> {
        if self.trust_proxy {
            if let Some(addr) = Self::forwarded(parts) {
                return Ok(ClientKey::new(addr));
            }
        }

        let key = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| ClientKey::from(addr.ip().to_string()))
            .unwrap_or_else(ClientKey::unknown);

        Ok(key)
    }
}

/// Decides whether a request bypasses rate limiting.
///
/// Runs before the store is touched, so skipped requests consume neither
/// quota nor storage. An error propagates to the host; the request is
/// neither admitted nor rejected on its behalf.
#[async_trait]
pub trait SkipPredicate: Send + Sync {
    /// Whether to let the request through without accounting.
    async fn should_skip(&self, parts: &Parts, key: &ClientKey) -> Result<bool>;
}

/// Never skips.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSkip;

#[async_trait]
impl SkipPredicate for NeverSkip {
    async fn should_skip(&self, _parts: &Parts, _key: &ClientKey) -> Result<bool> {
        Ok(false)
    }
}

/// Skips requests whose path exactly matches one of a fixed set.
#[derive(Debug, Clone, Default)]
pub struct SkipPaths {
    paths: HashSet<String>,
}

impl SkipPaths {
    /// Create a predicate for the given paths.
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SkipPredicate for SkipPaths {
    async fn should_skip(&self, parts: &Parts, _key: &ClientKey) -> Result<bool> {
        Ok(self.paths.contains(parts.uri.path()))
    }
}

/// Body sent with a `429 Too Many Requests` response.
#[derive(Clone)]
pub enum ErrorResponse {
    /// Plain text body
    Text(String),
    /// JSON body
    Json(serde_json::Value),
    /// Body computed from the rejected request
    Dynamic(Arc<dyn Fn(&Parts) -> ErrorResponse + Send + Sync>),
}

impl ErrorResponse {
    /// Compute the body from the rejected request.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&Parts) -> ErrorResponse + Send + Sync + 'static,
    {
        ErrorResponse::Dynamic(Arc::new(f))
    }

    /// Render the body. Status and rate limit headers are set by the caller.
    ///
    /// A producer is called once. If it returns another `Dynamic`, the
    /// default body is sent instead.
    pub fn render(&self, parts: &Parts) -> Response {
        match self {
            ErrorResponse::Dynamic(f) => match f(parts) {
                ErrorResponse::Dynamic(_) => {
                    warn!("Error body producer returned another producer, using default body");
                    ErrorResponse::default().render_static()
                }
                produced => produced.render_static(),
            },
            fixed => fixed.render_static(),
        }
    }

    fn render_static(&self) -> Response {
        match self {
            ErrorResponse::Text(text) => text.clone().into_response(),
            ErrorResponse::Json(value) => Json(value.clone()).into_response(),
            ErrorResponse::Dynamic(_) => ErrorResponse::default().render_static(),
        }
    }
}

impl Default for ErrorResponse {
    fn default() -> Self {
        ErrorResponse::Json(json!({
            "statusCode": 429,
            "error": "Too Many Requests",
            "message": "Rate limit exceeded, retry later",
        }))
    }
}

impl std::fmt::Debug for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorResponse::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ErrorResponse::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ErrorResponse::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<&str> for ErrorResponse {
    fn from(text: &str) -> Self {
        ErrorResponse::Text(text.to_string())
    }
}

impl From<serde_json::Value> for ErrorResponse {
    fn from(value: serde_json::Value) -> Self {
        ErrorResponse::Json(value)
    }
}
