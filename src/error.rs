//! Error types for Turnstile.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Invalid configuration, raised before any request is served
    #[error("Configuration error: {0}")]
    Config(String),

    /// The key extractor could not derive a client key
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// The skip predicate failed
    #[error("Skip predicate failed: {0}")]
    SkipPredicate(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for TurnstileError {
    fn from(err: ::config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Hook failures surface through the host's regular error path.
impl IntoResponse for TurnstileError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
