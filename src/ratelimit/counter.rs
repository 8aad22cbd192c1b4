//! Fixed-window counter state.

use super::clock::Timestamp;

/// Requests counted for one client in its current window.
///
/// A counter is created when a window opens, incremented for every request
/// inside that window, and replaced by a fresh one once `now > reset_at`.
/// It is never incremented in place after expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    /// Requests observed in the current window, including rejected ones
    pub count: u64,
    /// Absolute time at which the current window expires
    pub reset_at: Timestamp,
}

impl WindowCounter {
    /// Open a new, empty window at `now`.
    pub fn open(now: Timestamp, window_ms: u64) -> Self {
        Self {
            count: 0,
            reset_at: now.saturating_add(window_ms),
        }
    }

    /// Whether the window has ended at `now`.
    ///
    /// The reset instant itself still belongs to the window.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.reset_at
    }
}
