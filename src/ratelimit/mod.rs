//! Rate limiting logic and state management.

mod clock;
mod counter;
mod key;
mod limiter;
mod store;
mod window;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use counter::WindowCounter;
pub use key::{ClientKey, UNKNOWN_CLIENT};
pub use limiter::RateLimiter;
pub use store::{CounterStore, MemoryStore, DEFAULT_CAPACITY, DEFAULT_TTL};
pub use window::{evaluate, Decision, RateLimitHeaders, WindowPolicy, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
