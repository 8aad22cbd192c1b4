//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock, Timestamp};
use super::key::ClientKey;
use super::store::{CounterStore, MemoryStore};
use super::window::{self, Decision, WindowPolicy};
use crate::config::RateLimitingConfig;
use crate::error::{Result, TurnstileError};

/// Runs one accounting pass per request against a counter store.
///
/// The limiter owns its store; nothing else mutates it. Several limiters with
/// different policies can coexist since there is no shared global state.
pub struct RateLimiter<S: CounterStore = MemoryStore> {
    /// Counters indexed by client key
    store: S,
    /// Limit and window applied to every key
    policy: WindowPolicy,
    /// Time source for window and TTL expiry
    clock: Arc<dyn Clock>,
}

impl RateLimiter<MemoryStore> {
    /// Build a limiter with an in-memory store from configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        config.validate()?;

        let policy = WindowPolicy::new(config.max_requests, config.window_duration())?;
        let store = MemoryStore::new(config.store_capacity, config.store_ttl())?;
        Self::new(policy, store)
    }
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a new rate limiter.
    ///
    /// Fails if the store's TTL is shorter than the window, since entries
    /// could then be dropped while their window is still open.
    pub fn new(policy: WindowPolicy, store: S) -> Result<Self> {
        if store.ttl() < policy.window() {
            return Err(TurnstileError::Config(format!(
                "store TTL ({}ms) must not be shorter than the window ({}ms)",
                store.ttl().as_millis(),
                policy.window_ms()
            )));
        }

        Ok(Self {
            store,
            policy,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Account for one request from `key` at the current time.
    ///
    /// The updated counter is stored whether or not the request is admitted.
    pub fn check(&self, key: &ClientKey) -> Decision {
        self.check_at(key, self.clock.now_ms())
    }

    /// Account for one request from `key` at `now`.
    pub fn check_at(&self, key: &ClientKey, now: Timestamp) -> Decision {
        let policy = self.policy;
        let decision = self.store.update(key, now, |existing| {
            let decision = window::evaluate(existing, now, &policy);
            (decision.counter, decision)
        });

        trace!(
            key = %key,
            count = decision.counter.count,
            limit = policy.max_requests(),
            admitted = decision.admitted,
            "Checked rate limit"
        );

        if !decision.admitted {
            debug!(
                key = %key,
                count = decision.counter.count,
                "Over limit"
            );
        }

        decision
    }

    /// Current count for `key` in its open window.
    ///
    /// Returns `None` if the key has no live window.
    pub fn counter_value(&self, key: &ClientKey) -> Option<u64> {
        let now = self.clock.now_ms();
        self.store
            .get(key, now)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.count)
    }

    /// Forget the counter for `key`.
    pub fn reset(&self, key: &ClientKey) {
        self.store.remove(key);
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Number of stored counters.
    pub fn counter_count(&self) -> usize {
        self.store.len()
    }

    /// Drop counters past the store TTL, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now_ms())
    }

    /// The policy applied by this limiter.
    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: CounterStore + 'static> RateLimiter<S> {
    /// Periodically purge TTL-expired counters in the background.
    ///
    /// Expired entries are also dropped lazily on access; the sweep only
    /// bounds memory held by clients that never return.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        info!(interval_secs = interval.as_secs(), "Starting counter sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let purged = limiter.purge_expired();
                if purged > 0 {
                    debug!(
                        purged,
                        remaining = limiter.counter_count(),
                        "Purged expired counters"
                    );
                }
            }
        })
    }
}
