//! Quotas: how many requests are admitted per sliding window.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SlidelogError};

/// Default number of admitted requests per window.
pub const DEFAULT_LIMIT: u64 = 10;
/// Default window size in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Named time windows accepted in policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }

    /// Get the length of this time window in milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.duration().as_millis() as u64
    }
}

/// A validated rate limit: at most `limit` admitted requests in any
/// trailing window of `window_ms` milliseconds.
///
/// Both fields are strictly positive. A zero window would make every stored
/// timestamp fall outside the window and the limiter would admit everything,
/// so such quotas cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quota {
    limit: u64,
    window_ms: u64,
}

impl Quota {
    /// Create a quota, rejecting a zero limit or a zero window.
    pub fn new(limit: u64, window_ms: u64) -> Result<Self> {
        if limit == 0 {
            return Err(SlidelogError::InvalidQuota(
                "limit must be greater than zero".to_string(),
            ));
        }
        if window_ms == 0 {
            return Err(SlidelogError::InvalidQuota(
                "window must be greater than zero".to_string(),
            ));
        }
        Ok(Self { limit, window_ms })
    }

    /// A quota of `limit` requests per named time window.
    pub fn per(window: TimeWindow, limit: u64) -> Result<Self> {
        Self::new(limit, window.as_millis())
    }

    /// Maximum admitted requests per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

impl std::fmt::Display for Quota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}ms", self.limit, self.window_ms)
    }
}
