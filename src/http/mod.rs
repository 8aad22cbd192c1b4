//! HTTP binding: admission middleware and server for axum.

mod hooks;
mod middleware;
mod server;

pub use hooks::{ErrorResponse, KeyExtractor, NeverSkip, ProxyHeaderKey, SkipPaths, SkipPredicate};
pub use middleware::{
    apply_headers, enforce, protect, Admission, RATELIMIT_LIMIT, RATELIMIT_REMAINING,
    RATELIMIT_RESET,
};
pub use server::HttpServer;
