//! Slidelog - In-memory Sliding Window Rate Limiter
//!
//! This crate decides, per client key, whether a request may proceed under a
//! sliding-window quota. State is owned by a [`ratelimit::RateLimiter`]
//! instance that callers construct, share behind an `Arc` and drop; idle
//! keys are evicted by a background sweeper.

pub mod config;
pub mod error;
pub mod ratelimit;
