//! Sliding window counter backend.
//!
//! Approximates the sliding window log with two fixed-window counts per key.
//! The previous window's count is weighted by how much of it still overlaps
//! the trailing window, which keeps memory per key constant regardless of
//! the limit.

use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::{Decision, RateLimitBackend};
use super::quota::Quota;

/// Per-key fixed-window counts.
#[derive(Debug, Default, Clone, Copy)]
struct WindowCounts {
    /// Index of the current fixed window (`now / window_ms`)
    window_index: u64,
    /// Admitted requests in the current fixed window
    current: u64,
    /// Admitted requests in the fixed window before it
    previous: u64,
    /// Last time this key was checked
    last_seen: u64,
    /// Window of the last check, in milliseconds
    window_ms: u64,
}

impl WindowCounts {
    /// Roll the fixed windows forward to the one containing `now`.
    fn advance(&mut self, now: u64, window_ms: u64) {
        let index = now / window_ms;
        if index == self.window_index {
            return;
        }
        self.previous = if index == self.window_index + 1 {
            self.current
        } else {
            0
        };
        self.current = 0;
        self.window_index = index;
    }
}

/// Approximate sliding window rate limiting with O(1) state per key.
#[derive(Debug, Default)]
pub struct SlidingWindowCounter {
    counters: DashMap<String, WindowCounts>,
}

impl SlidingWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitBackend for SlidingWindowCounter {
    fn name(&self) -> &'static str {
        "counter"
    }

    fn check(&self, key: &str, quota: &Quota, now: u64) -> Decision {
        let window = quota.window_ms();
        let limit = quota.limit();

        let mut counts = self.counters.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, quota = %quota, "Creating new window counter");
            WindowCounts {
                window_index: now / window,
                ..WindowCounts::default()
            }
        });

        counts.last_seen = now;
        counts.window_ms = window;
        counts.advance(now, window);

        let elapsed = now % window;
        let overlap = window - elapsed;

        // estimate * window, kept in integers
        let weighted = counts.previous as u128 * overlap as u128
            + counts.current as u128 * window as u128;
        let capacity = limit as u128 * window as u128;

        trace!(
            key = %key,
            current = counts.current,
            previous = counts.previous,
            limit = limit,
            "Checking window counter"
        );

        if weighted >= capacity {
            let retry_after = if counts.current >= limit {
                overlap
            } else {
                // Wait for the previous window's share to decay below the slack.
                let slack = (limit - counts.current) as u128 * window as u128;
                let max_overlap = ((slack - 1) / counts.previous as u128) as u64;
                (overlap - max_overlap).max(1)
            };
            debug!(key = %key, limit = limit, "Rate limit exceeded");
            return Decision::reject(limit, retry_after);
        }

        counts.current += 1;
        let used = (weighted + window as u128).div_ceil(window as u128) as u64;
        Decision::admit(limit, limit.saturating_sub(used))
    }

    fn count(&self, key: &str) -> usize {
        self.counters
            .get(key)
            .map_or(0, |counts| counts.current as usize)
    }

    fn sweep_idle(&self, now: u64, idle_ttl_ms: u64) -> usize {
        let before = self.counters.len();
        // The previous fixed window still weighs in for up to two windows.
        self.counters.retain(|_, counts| {
            let horizon = idle_ttl_ms.max(counts.window_ms.saturating_mul(2));
            now.saturating_sub(counts.last_seen) <= horizon
        });
        before.saturating_sub(self.counters.len())
    }

    fn reset(&self, key: &str) -> bool {
        self.counters.remove(key).is_some()
    }

    fn clear(&self) {
        self.counters.clear();
    }

    fn key_count(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(limit: u64, window_ms: u64) -> Quota {
        Quota::new(limit, window_ms).unwrap()
    }

    #[test]
    fn test_counter_within_limit() {
        let backend = SlidingWindowCounter::new();
        let quota = quota(10, 1000);

        let decision = backend.check("a", &quota, 0);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
        assert_eq!(backend.count("a"), 1);
    }

    #[test]
    fn test_counter_exceeds_limit() {
        let backend = SlidingWindowCounter::new();
        let quota = quota(5, 1000);

        for t in 0..5 {
            assert!(backend.check("a", &quota, t).allowed);
        }

        // The 6th request should be rejected
        let decision = backend.check("a", &quota, 5);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after.as_millis(), 995);
    }

    #[test]
    fn test_previous_window_is_weighted() {
        let backend = SlidingWindowCounter::new();
        let quota = quota(4, 1000);

        for t in 0..4 {
            assert!(backend.check("a", &quota, t).allowed);
        }

        // At t=1500 half of the previous window overlaps: estimate = 4 * 0.5 = 2
        assert!(backend.check("a", &quota, 1500).allowed);
        assert!(backend.check("a", &quota, 1500).allowed);
        // estimate = 2 + 2 = 4
        let decision = backend.check("a", &quota, 1500);
        assert!(!decision.allowed);
        // Needs previous * overlap < 2 * 1000, i.e. overlap <= 499
        assert_eq!(decision.retry_after.as_millis(), 1);
        assert!(backend.check("a", &quota, 1501).allowed);
    }

    #[test]
    fn test_counts_reset_after_idle_window() {
        let backend = SlidingWindowCounter::new();
        let quota = quota(2, 1000);

        backend.check("a", &quota, 0);
        backend.check("a", &quota, 1);
        assert!(!backend.check("a", &quota, 2).allowed);

        // Two full windows later nothing overlaps
        assert!(backend.check("a", &quota, 2500).allowed);
        assert_eq!(backend.count("a"), 1);
    }

    #[test]
    fn test_keys_are_isolated() {
        let backend = SlidingWindowCounter::new();
        let quota = quota(1, 500);

        assert!(backend.check("x", &quota, 0).allowed);
        assert!(backend.check("y", &quota, 0).allowed);
        assert!(!backend.check("x", &quota, 1).allowed);
    }

    #[test]
    fn test_sweep_idle_counters() {
        let backend = SlidingWindowCounter::new();
        let quota = quota(2, 1000);

        backend.check("old", &quota, 0);
        backend.check("fresh", &quota, 9_000);

        assert_eq!(backend.sweep_idle(10_000, 5_000), 1);
        assert_eq!(backend.key_count(), 1);
        assert!(backend.reset("fresh"));
    }

    #[test]
    fn test_sweep_keeps_previous_window_weight() {
        let backend = SlidingWindowCounter::new();
        let hourly = quota(2, 3_600_000);

        assert!(backend.check("k", &hourly, 0).allowed);
        assert!(backend.check("k", &hourly, 0).allowed);

        // Past the TTL and the first window, the previous window still counts
        assert_eq!(backend.sweep_idle(3_600_000, 600_000), 0);
        assert!(!backend.check("k", &hourly, 3_600_000).allowed);

        assert_eq!(backend.sweep_idle(3_600_000 + 7_200_001, 600_000), 1);
    }

    #[test]
    fn test_rejection_does_not_consume_quota() {
        let backend = SlidingWindowCounter::new();
        let quota = quota(2, 1000);

        backend.check("a", &quota, 0);
        backend.check("a", &quota, 100);
        for t in 200..260 {
            assert!(!backend.check("a", &quota, t).allowed);
        }
        assert_eq!(backend.count("a"), 2);

        // Two windows later nothing overlaps and both slots are free
        assert!(backend.check("a", &quota, 2000).allowed);
        assert!(backend.check("a", &quota, 2001).allowed);
        assert!(!backend.check("a", &quota, 2002).allowed);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_limit() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let backend = Arc::new(SlidingWindowCounter::new());
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
