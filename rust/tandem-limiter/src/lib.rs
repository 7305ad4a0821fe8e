//! Token-bucket rate limiting.
//!
//! A [`RateLimiter`] admits short bursts of up to `capacity` operations and, once the
//! bucket is drained, one operation per refill interval.

mod limiter;

pub use limiter::RateLimiter;
