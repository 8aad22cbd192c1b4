//! Fixed-window accounting.
//!
//! [`evaluate`] is a pure function: given the stored counter (if any), the
//! current time and the policy, it returns the counter to write back together
//! with the admission verdict and the header values to expose. It never
//! touches a store or a request, so hosts decide how to apply the result.

use std::time::Duration;

use super::clock::Timestamp;
use super::counter::WindowCounter;
use crate::error::{Result, TurnstileError};

/// Default number of requests admitted per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 100;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Limit and window length applied to every client of one limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    max_requests: u64,
    window_ms: u64,
}

impl WindowPolicy {
    /// Create a policy admitting `max_requests` per `window`.
    ///
    /// A zero-length window is rejected since every request would open a
    /// new one.
    pub fn new(max_requests: u64, window: Duration) -> Result<Self> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        if window_ms == 0 {
            return Err(TurnstileError::Config(
                "window duration must be at least 1ms".to_string(),
            ));
        }

        Ok(Self {
            max_requests,
            window_ms,
        })
    }

    /// Maximum requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW.as_millis() as u64,
        }
    }
}

/// Values for the rate limit response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// `RateLimit-Limit`
    pub limit: u64,
    /// `RateLimit-Remaining`
    pub remaining: u64,
    /// `RateLimit-Reset`, the window's reset instant in epoch seconds
    pub reset: u64,
    /// `Retry-After` in seconds, only set on rejection
    pub retry_after: Option<u64>,
}

/// Outcome of one accounting pass for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Counter to store, written back whether or not the request is admitted
    pub counter: WindowCounter,
    /// Whether the request may proceed
    pub admitted: bool,
    /// Header values to expose on the response
    pub headers: RateLimitHeaders,
}

/// Account for one request and decide whether it is admitted.
///
/// Stale or missing counters are replaced by a fresh window before counting.
/// Rejected requests still increment the count, so a client hammering past
/// its limit keeps accumulating until the window resets.
pub fn evaluate(existing: Option<WindowCounter>, now: Timestamp, policy: &WindowPolicy) -> Decision {
    let mut counter = match existing {
        Some(counter) if !counter.is_expired(now) => counter,
        _ => WindowCounter::open(now, policy.window_ms),
    };

    counter.count = counter.count.saturating_add(1);
    let admitted = counter.count <= policy.max_requests;

    let headers = RateLimitHeaders {
        limit: policy.max_requests,
        remaining: policy.max_requests.saturating_sub(counter.count),
        reset: ceil_secs(counter.reset_at),
        retry_after: (!admitted).then(|| ceil_secs(policy.window_ms)),
    };

    Decision {
        counter,
        admitted,
        headers,
    }
}

fn ceil_secs(millis: u64) -> u64 {
    millis.div_ceil(1000)
}
