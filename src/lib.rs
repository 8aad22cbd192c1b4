//! Turnstile - Fixed-Window Request Admission Control
//!
//! This crate decides, per client, whether an HTTP request may proceed or
//! must be rejected because the client exceeded its request budget for the
//! current fixed window. Counters live in a bounded in-memory store with LRU
//! eviction and a store-level TTL; the [`http`] module binds the limiter to
//! axum as middleware.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
