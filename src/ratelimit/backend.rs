//! Rate limit backend trait for abstracting the keyed state stores.

use std::time::Duration;

use super::quota::Quota;

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// The limit that was applied
    pub limit: u64,
    /// Requests still available in the current window after this check
    pub remaining: u64,
    /// How long until a request for this key would be admitted again.
    /// Always zero for admitted requests.
    pub retry_after: Duration,
}

impl Decision {
    pub(crate) fn admit(limit: u64, remaining: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after: Duration::ZERO,
        }
    }

    pub(crate) fn reject(limit: u64, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after: Duration::from_millis(retry_after_ms),
        }
    }
}

/// Trait for keyed rate limit state stores.
///
/// Implementations own all per-key state and must make the
/// read-modify-write of a single key atomic with respect to concurrent
/// checks of that key. Time is supplied by the caller in milliseconds.
pub trait RateLimitBackend: Send + Sync {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Check `key` against `quota` at `now`, recording the request if admitted.
    fn check(&self, key: &str, quota: &Quota, now: u64) -> Decision;

    /// Number of requests currently recorded for `key`, without pruning.
    fn count(&self, key: &str) -> usize;

    /// Remove every key not touched within `idle_ttl_ms` of `now`.
    ///
    /// Returns the number of evicted keys.
    fn sweep_idle(&self, now: u64, idle_ttl_ms: u64) -> usize;

    /// Forget all state for `key`. Returns `true` if the key was tracked.
    fn reset(&self, key: &str) -> bool;

    /// Forget all state.
    fn clear(&self);

    /// Number of tracked keys.
    fn key_count(&self) -> usize;
}
