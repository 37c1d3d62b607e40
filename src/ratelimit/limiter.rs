//! Core rate limiter implementation.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::backend::{Decision, RateLimitBackend};
use super::clock::{Clock, MonotonicClock};
use super::counter::SlidingWindowCounter;
use super::key::BucketKey;
use super::policy::PolicySet;
use super::quota::Quota;
use super::window_log::SlidingWindowLog;
use crate::config::{LimiterConfig, SlidelogConfig, Strategy};
use crate::error::{Result, SlidelogError};

/// The rate limiter that callers hold on to.
///
/// Owns its keyed state, its clock and its policies. This struct is
/// thread-safe and can be shared across tasks behind an `Arc`.
pub struct RateLimiter {
    /// Keyed state store
    backend: Box<dyn RateLimitBackend>,
    /// Time source
    clock: Arc<dyn Clock>,
    /// Named policies, replaceable at runtime
    policies: RwLock<PolicySet>,
    /// Quota used by `check_default`
    default_quota: Quota,
    /// Keys idle for longer than this are evicted by `sweep_idle`
    idle_ttl: Duration,
}

impl RateLimiter {
    /// Create a sliding window log limiter with default settings.
    pub fn new() -> Self {
        Self::with_backend(Box::new(SlidingWindowLog::new()), Arc::new(MonotonicClock::new()))
    }

    /// Create a limiter over an explicit backend and clock.
    pub fn with_backend(backend: Box<dyn RateLimitBackend>, clock: Arc<dyn Clock>) -> Self {
        let default_quota = Quota::default();
        Self {
            backend,
            clock,
            policies: RwLock::new(PolicySet::new()),
            default_quota,
            idle_ttl: default_quota.window() * 10,
        }
    }

    /// Build a limiter from configuration.
    pub fn from_config(config: &SlidelogConfig) -> Result<Self> {
        Self::from_config_with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Build a limiter from configuration with an explicit clock.
    pub fn from_config_with_clock(config: &SlidelogConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let policies = PolicySet::from_rules(&config.policies)?;
        let limiter_config: &LimiterConfig = &config.limiter;
        let default_quota = limiter_config.default_quota()?;
        let idle_ttl_ms = limiter_config.idle_ttl_ms;

        let backend: Box<dyn RateLimitBackend> = match limiter_config.strategy {
            Strategy::Log => Box::new(SlidingWindowLog::new()),
            Strategy::Counter => Box::new(SlidingWindowCounter::new()),
        };

        // The idle TTL must cover the largest configured window.
        let max_window = policies
            .max_window_ms()
            .unwrap_or(0)
            .max(default_quota.window_ms());
        let idle_ttl_ms = if idle_ttl_ms < max_window {
            warn!(
                idle_ttl_ms = idle_ttl_ms,
                max_window_ms = max_window,
                "Idle TTL shorter than the largest window, raising it"
            );
            max_window
        } else {
            idle_ttl_ms
        };

        info!(
            backend = backend.name(),
            default_quota = %default_quota,
            policies = policies.len(),
            idle_ttl_ms = idle_ttl_ms,
            "Rate limiter configured"
        );

        Ok(Self {
            backend,
            clock,
            policies: RwLock::new(policies),
            default_quota,
            idle_ttl: Duration::from_millis(idle_ttl_ms),
        })
    }

    /// Decide whether a request for `key` may proceed under `limit`
    /// requests per `window_ms` milliseconds.
    ///
    /// Admitted requests are recorded, rejected ones are not. A zero limit
    /// or window is treated as a caller error: the request is rejected and
    /// no state is touched.
    pub fn check(&self, key: &str, limit: u64, window_ms: u64) -> bool {
        match Quota::new(limit, window_ms) {
            Ok(quota) => self.check_quota(key, &quota).allowed,
            Err(e) => {
                warn!(key = %key, limit = limit, window_ms = window_ms, error = %e, "Rejecting check with invalid quota");
                false
            }
        }
    }

    /// Check `key` against the default quota.
    pub fn check_default(&self, key: &str) -> bool {
        self.check_quota(key, &self.default_quota).allowed
    }

    /// Check `key` against `quota`, returning the full decision.
    pub fn check_quota(&self, key: &str, quota: &Quota) -> Decision {
        let now = self.clock.now_millis();
        trace!(key = %key, quota = %quota, now = now, "Checking rate limit");
        self.backend.check(key, quota, now)
    }

    /// Check `client` against a named policy.
    ///
    /// Each policy keeps its own buckets, so a client throttled under one
    /// policy is unaffected under another.
    pub fn check_policy(&self, policy: &str, client: &str) -> Result<Decision> {
        let quota = self
            .policies
            .read()
            .get(policy)
            .ok_or_else(|| SlidelogError::UnknownPolicy(policy.to_string()))?;
        let key = BucketKey::scoped(policy, client);
        Ok(self.check_quota(&key.to_string_key(), &quota))
    }

    /// Replace the policy table.
    pub fn set_policies(&self, policies: PolicySet) {
        let mut current = self.policies.write();
        debug!(count = policies.len(), "Replacing rate limit policies");
        *current = policies;
    }

    /// Get the quota for a named policy.
    pub fn policy(&self, name: &str) -> Option<Quota> {
        self.policies.read().get(name)
    }

    /// The quota used by `check_default`.
    pub fn default_quota(&self) -> Quota {
        self.default_quota
    }

    /// How long a key may stay idle before the sweeper evicts it.
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Evict keys idle for longer than the idle TTL.
    ///
    /// Returns the number of evicted keys.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now_millis();
        let evicted = self.backend.sweep_idle(now, self.idle_ttl.as_millis() as u64);
        debug!(evicted = evicted, remaining = self.backend.key_count(), "Swept idle keys");
        evicted
    }

    /// Requests currently recorded for `key`.
    pub fn count(&self, key: &str) -> usize {
        self.backend.count(key)
    }

    /// Forget all state for `key`.
    pub fn reset(&self, key: &str) -> bool {
        self.backend.reset(key)
    }

    /// Clear all keys.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.backend.clear();
    }

    /// Get the number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.backend.key_count()
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
