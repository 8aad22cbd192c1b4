//! Bounded counter storage.
//!
//! Entries carry two independent expiries. The window expiry inside
//! [`WindowCounter`] drives counting; the store-level TTL is a coarser
//! physical bound that drops keys which never come back. The TTL must be at
//! least the window length or active clients would be reset mid-window.
//!
//! Capacity is bounded with LRU eviction. Eviction is lossy: a client whose
//! entry was evicted starts from zero on its next request. That is an
//! accepted approximation under key churn, not a correctness failure.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::clock::Timestamp;
use super::counter::WindowCounter;
use super::key::ClientKey;
use crate::error::{Result, TurnstileError};

/// Default maximum number of tracked clients.
pub const DEFAULT_CAPACITY: usize = 10_000;
/// Default store-level time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Storage for per-client window counters.
///
/// Implementations must serialize [`CounterStore::update`] per key so that
/// concurrent requests never lose an increment.
pub trait CounterStore: Send + Sync {
    /// Get the live counter for `key`, if any.
    ///
    /// Entries past their store-level TTL are treated as absent.
    fn get(&self, key: &ClientKey, now: Timestamp) -> Option<WindowCounter>;

    /// Insert or overwrite the counter for `key`, refreshing its recency
    /// and re-arming its TTL.
    fn set(&self, key: &ClientKey, counter: WindowCounter, now: Timestamp);

    /// Atomically read, transform and write back the counter for `key`.
    ///
    /// `f` receives the live counter (as [`CounterStore::get`] would return
    /// it) and yields the counter to store plus a value handed back to the
    /// caller. No other operation on `key` interleaves with the update.
    fn update<T, F>(&self, key: &ClientKey, now: Timestamp, f: F) -> T
    where
        F: FnOnce(Option<WindowCounter>) -> (WindowCounter, T);

    /// Remove the entry for `key`, returning it if it was present.
    fn remove(&self, key: &ClientKey) -> Option<WindowCounter>;

    /// Drop every entry whose TTL has passed, returning how many were dropped.
    fn purge_expired(&self, now: Timestamp) -> usize;

    /// Number of stored entries, including ones not yet purged.
    fn len(&self) -> usize;

    /// Whether the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries.
    fn clear(&self);

    /// Store-level time-to-live applied on every write.
    fn ttl(&self) -> Duration;
}

struct Slot {
    counter: WindowCounter,
    expires_at: Timestamp,
}

impl Slot {
    /// Same boundary as [`WindowCounter::is_expired`]: the expiry instant
    /// itself is still live.
    fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }
}

/// In-memory LRU store with per-entry TTL.
///
/// A single mutex guards the map: LRU recency is shared across all keys, so
/// every access mutates common state anyway. Critical sections are short and
/// never perform I/O.
pub struct MemoryStore {
    entries: Mutex<LruCache<ClientKey, Slot>>,
    ttl_ms: u64,
}

impl MemoryStore {
    /// Create a store holding at most `capacity` entries, each living at most
    /// `ttl` after its last write.
    pub fn new(capacity: usize, ttl: Duration) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            TurnstileError::Config("store capacity must be greater than zero".to_string())
        })?;

        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if ttl_ms == 0 {
            return Err(TurnstileError::Config(
                "store TTL must be at least 1ms".to_string(),
            ));
        }

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl_ms,
        })
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    fn live(
        entries: &mut LruCache<ClientKey, Slot>,
        key: &ClientKey,
        now: Timestamp,
    ) -> Option<WindowCounter> {
        let expired = entries.peek(key)?.is_expired(now);
        if expired {
            trace!(key = %key, "Dropping counter past its TTL");
            entries.pop(key);
            return None;
        }

        entries.get(key).map(|slot| slot.counter)
    }

    fn write(
        &self,
        entries: &mut LruCache<ClientKey, Slot>,
        key: &ClientKey,
        counter: WindowCounter,
        now: Timestamp,
    ) {
        let slot = Slot {
            counter,
            expires_at: now.saturating_add(self.ttl_ms),
        };

        if let Some((evicted, _)) = entries.push(key.clone(), slot) {
            if &evicted != key {
                debug!(
                    evicted = %evicted,
                    capacity = entries.cap().get(),
                    "Evicted least recently used counter"
                );
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl_ms: DEFAULT_TTL.as_millis() as u64,
        }
    }
}

impl CounterStore for MemoryStore {
    fn get(&self, key: &ClientKey, now: Timestamp) -> Option<WindowCounter> {
        let mut entries = self.entries.lock();
        Self::live(&mut entries, key, now)
    }

    fn set(&self, key: &ClientKey, counter: WindowCounter, now: Timestamp) {
        let mut entries = self.entries.lock();
        self.write(&mut entries, key, counter, now);
    }

    fn update<T, F>(&self, key: &ClientKey, now: Timestamp, f: F) -> T
    where
        F: FnOnce(Option<WindowCounter>) -> (WindowCounter, T),
    {
        let mut entries = self.entries.lock();
        let existing = Self::live(&mut entries, key, now);
        let (counter, output) = f(existing);
        self.write(&mut entries, key, counter, now);
        output
    }

    fn remove(&self, key: &ClientKey) -> Option<WindowCounter> {
        self.entries.lock().pop(key).map(|slot| slot.counter)
    }

    fn purge_expired(&self, now: Timestamp) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<ClientKey> = entries
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }

        expired.len()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}
