//! Rate limiting for bot resources.
//!
//! Two policies are available, selected per logical resource:
//!
//! - **Cooldown**: a subject may use the resource once, then waits `window_seconds`.
//! - **Quota**: a session accepts at most `max_count` calls within a sliding
//!   `window_seconds`; a rejected call reports when the oldest live call expires.
//!
//! Both are backed by [`crate::cache::ExpiringCache`], one per session.
//!
//! # Configuration
//!
//! ```toml
//! [rate_limit]
//! allowlist = ["10001"]
//!
//! [rate_limit.resources.message]
//! policy = "quota"
//! window_seconds = 10
//! max_count = 5
//! ```

mod limiter;
mod manager;

pub use limiter::{RateLimitResult, RateLimiter};
pub use manager::RateLimitManager;
