//! Sliding window log backend.
//!
//! Each key keeps the timestamps of its admitted requests. A check prunes
//! timestamps that fell out of the trailing window, counts what is left and
//! appends the current time only if the request is admitted.

use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::{debug, trace};

use super::backend::{Decision, RateLimitBackend};
use super::quota::Quota;

/// Per-key request log.
#[derive(Debug, Default)]
struct KeyLog {
    /// Admitted request times, oldest first
    timestamps: VecDeque<u64>,
    /// Last time this key was checked, admitted or not
    last_seen: u64,
    /// Window of the last check, in milliseconds
    window_ms: u64,
}

impl KeyLog {
    /// Drop timestamps strictly older than `window_start`.
    fn prune(&mut self, window_start: u64) {
        while let Some(&oldest) = self.timestamps.front() {
            if oldest < window_start {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Exact sliding window rate limiting backed by a concurrent map.
///
/// The map entry guard is held for the whole prune-count-append sequence, so
/// concurrent checks of one key never admit more than the limit.
#[derive(Debug, Default)]
pub struct SlidingWindowLog {
    logs: DashMap<String, KeyLog>,
}

impl SlidingWindowLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitBackend for SlidingWindowLog {
    fn name(&self) -> &'static str {
        "log"
    }

    fn check(&self, key: &str, quota: &Quota, now: u64) -> Decision {
        let window_start = now.saturating_sub(quota.window_ms());
        let limit = quota.limit();

        let mut log = self.logs.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, quota = %quota, "Creating new request log");
            KeyLog::default()
        });

        log.last_seen = now;
        log.window_ms = quota.window_ms();
        log.prune(window_start);

        let in_window = log.timestamps.len() as u64;
        trace!(key = %key, in_window = in_window, limit = limit, "Checking request log");

        if in_window >= limit {
            // The request that has to expire before a slot frees up.
            let blocking = log.timestamps[(in_window - limit) as usize];
            let retry_after = (blocking + quota.window_ms() + 1).saturating_sub(now);
            debug!(key = %key, in_window = in_window, limit = limit, "Rate limit exceeded");
            return Decision::reject(limit, retry_after);
        }

        log.timestamps.push_back(now);
        Decision::admit(limit, limit - in_window - 1)
    }

    fn count(&self, key: &str) -> usize {
        self.logs.get(key).map_or(0, |log| log.timestamps.len())
    }

    fn sweep_idle(&self, now: u64, idle_ttl_ms: u64) -> usize {
        let before = self.logs.len();
        // A key is only idle once its last window has fully passed.
        self.logs.retain(|_, log| {
            now.saturating_sub(log.last_seen) <= idle_ttl_ms.max(log.window_ms)
        });
        before.saturating_sub(self.logs.len())
    }

    fn reset(&self, key: &str) -> bool {
        self.logs.remove(key).is_some()
    }

    fn clear(&self) {
        self.logs.clear();
    }

    fn key_count(&self) -> usize {
        self.logs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn quota(limit: u64, window_ms: u64) -> Quota {
        Quota::new(limit, window_ms).unwrap()
    }

    #[test]
    fn test_admits_up_to_limit_then_rejects() {
        let backend = SlidingWindowLog::new();
        let quota = quota(3, 1000);

        for t in 0..3 {
            assert!(backend.check("client", &quota, t).allowed);
        }
        assert!(!backend.check("client", &quota, 3).allowed);
    }

    #[test]
    fn test_two_per_second_scenario() {
        let backend = SlidingWindowLog::new();
        let quota = quota(2, 1000);

        assert!(backend.check("a", &quota, 0).allowed);
        assert!(backend.check("a", &quota, 100).allowed);
        assert!(!backend.check("a", &quota, 200).allowed);
        assert!(backend.check("a", &quota, 1001).allowed);
    }

    #[test]
    fn test_timestamp_on_window_boundary_still_counts() {
        let backend = SlidingWindowLog::new();
        let quota = quota(1, 1000);

        assert!(backend.check("a", &quota, 0).allowed);
        // window_start == 0, the request at t=0 is not strictly older
        assert!(!backend.check("a", &quota, 1000).allowed);
        assert!(backend.check("a", &quota, 1001).allowed);
    }

    #[test]
    fn test_rejection_does_not_consume_quota() {
        let backend = SlidingWindowLog::new();
        let quota = quota(2, 1000);

        backend.check("a", &quota, 0);
        backend.check("a", &quota, 100);
        for t in 200..260 {
            assert!(!backend.check("a", &quota, t).allowed);
        }
        assert_eq!(backend.count("a"), 2);
        assert!(backend.check("a", &quota, 1001).allowed);
    }

    #[test]
    fn test_rejection_stores_pruned_log() {
        let backend = SlidingWindowLog::new();
        let generous = quota(3, 1000);
        let strict = quota(2, 1000);

        backend.check("a", &generous, 0);
        backend.check("a", &generous, 100);
        backend.check("a", &generous, 200);
        assert_eq!(backend.count("a"), 3);

        // t=0 leaves the window, two requests remain and block the strict quota
        assert!(!backend.check("a", &strict, 1050).allowed);
        assert_eq!(backend.count("a"), 2);
    }

    #[test]
    fn test_retry_after_points_at_oldest_blocking_request() {
        let backend = SlidingWindowLog::new();
        let quota = quota(2, 1000);

        backend.check("a", &quota, 0);
        backend.check("a", &quota, 100);
        let decision = backend.check("a", &quota, 200);

        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, Duration::from_millis(801));
    }

    #[test]
    fn test_remaining_counts_down() {
        let backend = SlidingWindowLog::new();
        let quota = quota(3, 1000);

        assert_eq!(backend.check("a", &quota, 0).remaining, 2);
        assert_eq!(backend.check("a", &quota, 1).remaining, 1);
        assert_eq!(backend.check("a", &quota, 2).remaining, 0);
    }

    #[test]
    fn test_keys_are_isolated() {
        let backend = SlidingWindowLog::new();
        let quota = quota(1, 500);

        assert!(backend.check("x", &quota, 0).allowed);
        assert!(backend.check("y", &quota, 0).allowed);
        assert!(!backend.check("x", &quota, 10).allowed);
        assert_eq!(backend.key_count(), 2);
    }

    #[test]
    fn test_sweep_removes_only_idle_keys() {
        let backend = SlidingWindowLog::new();
        let quota = quota(5, 1000);

        backend.check("old", &quota, 0);
        backend.check("fresh", &quota, 4_000);

        let evicted = backend.sweep_idle(5_000, 2_000);
        assert_eq!(evicted, 1);
        assert_eq!(backend.count("old"), 0);
        assert_eq!(backend.count("fresh"), 1);
    }

    #[test]
    fn test_sweep_keeps_keys_with_live_window() {
        let backend = SlidingWindowLog::new();
        let hourly = quota(1, 3_600_000);

        assert!(backend.check("k", &hourly, 0).allowed);
        // Idle for longer than the TTL but still inside the hour
        assert_eq!(backend.sweep_idle(600_001, 600_000), 0);
        assert!(!backend.check("k", &hourly, 600_001).allowed);

        assert_eq!(backend.sweep_idle(3_600_002 + 600_001, 600_000), 1);
        assert_eq!(backend.key_count(), 0);
    }

    #[test]
    fn test_reset_and_clear() {
        let backend = SlidingWindowLog::new();
        let quota = quota(5, 1000);

        backend.check("a", &quota, 0);
        backend.check("b", &quota, 0);

        assert!(backend.reset("a"));
        assert!(!backend.reset("a"));
        assert_eq!(backend.key_count(), 1);

        backend.clear();
        assert_eq!(backend.key_count(), 0);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_limit() {
        let backend = Arc::new(SlidingWindowLog::new());
        let quota = quota(50, 60_000);
        let admitted = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = backend.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if backend.check("shared", &quota, 1).allowed {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 50);
        assert_eq!(backend.count("shared"), 50);
    }
}
