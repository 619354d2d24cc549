//! In-memory expiring state.
//!
//! [`ExpiringCache`] is the single-owner store with lazy eviction and set algebra.
//! [`SharedCache`] puts one behind a mutex for concurrent handlers, and
//! [`CacheRegistry`] hands out named shared caches on first use.

mod expiring;
mod shared;

pub use expiring::{ExpiringCache, TtlStatus};
pub use shared::{CacheRegistry, SharedCache};
