//! Rate limiting logic and state management.

mod backend;
mod clock;
mod counter;
mod key;
mod limiter;
mod policy;
mod quota;
mod sweeper;
mod window_log;

pub use backend::{Decision, RateLimitBackend};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use counter::SlidingWindowCounter;
pub use key::BucketKey;
pub use limiter::RateLimiter;
pub use policy::{PolicyRule, PolicySet};
pub use quota::{Quota, TimeWindow, DEFAULT_LIMIT, DEFAULT_WINDOW_MS};
pub use sweeper::spawn_sweeper;
pub use window_log::SlidingWindowLog;
