//! Rate limiter built on expiring caches.
//!
//! Each session (typically a group) owns one cache. The cooldown policy keys it by
//! subject; the quota policy keys it by a strictly increasing token per accepted call and
//! counts the live keys.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheRegistry, TtlStatus};
use crate::clock::Clock;
use crate::config::LimitPolicy;

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed to proceed.
    Allowed {
        /// Maximum number of calls allowed in the window
        limit: u32,
        /// Number of calls remaining in the current window
        remaining: u32,
    },
    /// Request is rate limited and should be rejected.
    Limited {
        /// Maximum number of calls allowed in the window
        limit: u32,
        /// Number of calls remaining (always 0)
        remaining: u32,
        /// Time until the next call would be accepted
        reset_after: Duration,
    },
}

impl RateLimitResult {
    /// Result used for allow-listed subjects and unlimited resources.
    pub fn unlimited() -> Self {
        RateLimitResult::Allowed { limit: u32::MAX, remaining: u32::MAX }
    }

    /// Returns true if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Returns true if the request is limited.
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitResult::Limited { .. })
    }

    /// Get the limit value.
    pub fn limit(&self) -> u32 {
        match self {
            RateLimitResult::Allowed { limit, .. } => *limit,
            RateLimitResult::Limited { limit, .. } => *limit,
        }
    }

    /// Get the remaining count.
    pub fn remaining(&self) -> u32 {
        match self {
            RateLimitResult::Allowed { remaining, .. } => *remaining,
            RateLimitResult::Limited { remaining, .. } => *remaining,
        }
    }

    /// Get the reset duration if limited.
    pub fn reset_after(&self) -> Option<Duration> {
        match self {
            RateLimitResult::Limited { reset_after, .. } => Some(*reset_after),
            _ => None,
        }
    }
}

/// A rate limiter enforcing one policy over per-session expiring caches.
///
/// # Example
/// ```ignore
/// use std::sync::Arc;
/// use std::time::Duration;
/// use gavel_lib::clock::SystemClock;
/// use gavel_lib::config::LimitPolicy;
/// use gavel_lib::rate_limit::RateLimiter;
///
/// let limiter = RateLimiter::new(LimitPolicy::Quota, Duration::from_secs(10), 3, Arc::new(SystemClock));
///
/// if let Some(wait) = limiter.check("group-1", "user-7").reset_after() {
///     println!("slow down, retry in {:?}", wait);
/// }
/// ```
pub struct RateLimiter {
    policy: LimitPolicy,
    window: Duration,
    max_count: u32,
    sessions: CacheRegistry<()>,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// `max_count` is ignored by the cooldown policy, which always allows one call.
    pub fn new(policy: LimitPolicy, window: Duration, max_count: u32, clock: Arc<dyn Clock>) -> Self {
        let max_count = match policy {
            LimitPolicy::Cooldown => 1,
            LimitPolicy::Quota => max_count.max(1),
        };
        Self {
            policy,
            window,
            max_count,
            sessions: CacheRegistry::new(clock.clone()),
            clock,
            seq: AtomicU64::new(0),
        }
    }

    /// Check a call and record it if allowed.
    ///
    /// # Parameters
    /// - `session`: scope of the limit (e.g. a group id)
    /// - `subject`: who is calling; only the cooldown policy keys on it
    pub fn check(&self, session: &str, subject: &str) -> RateLimitResult {
        match self.policy {
            LimitPolicy::Cooldown => self.check_cooldown(session, subject),
            LimitPolicy::Quota => self.check_quota(session),
        }
    }

    fn check_cooldown(&self, session: &str, subject: &str) -> RateLimitResult {
        let cache = self.sessions.get_or_create(session);
        cache.with(|c| match c.ttl(subject) {
            TtlStatus::Remaining(left) => {
                RateLimitResult::Limited { limit: 1, remaining: 0, reset_after: left }
            }
            _ => {
                c.set(subject, (), Some(self.window));
                RateLimitResult::Allowed { limit: 1, remaining: 0 }
            }
        })
    }

    fn check_quota(&self, session: &str) -> RateLimitResult {
        let cache = self.sessions.get_or_create(session);
        cache.with(|c| {
            c.evict_expired();
            let live = c.len() as u32;

            if live >= self.max_count {
                let keys: Vec<String> = c.keys().cloned().collect();
                let reset_after = keys
                    .iter()
                    .filter_map(|k| c.ttl(k).remaining())
                    .min()
                    .unwrap_or(self.window);
                return RateLimitResult::Limited {
                    limit: self.max_count,
                    remaining: 0,
                    reset_after,
                };
            }

            c.set(self.next_token(), (), Some(self.window));
            RateLimitResult::Allowed {
                limit: self.max_count,
                remaining: self.max_count - live - 1,
            }
        })
    }

    // `<now_ms>-<seq>`: the sequence keeps tokens distinct within one millisecond.
    fn next_token(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq:020}", self.clock.now_unix_ms())
    }

    /// Forget every recorded call.
    pub fn reset(&self) {
        for (_, cache) in self.sessions.all() {
            cache.clear();
        }
    }

    /// Drop expired entries in every session, then forget sessions left empty.
    /// Returns the number of evicted keys.
    pub fn compact(&self) -> usize {
        let evicted = self.sessions.evict_expired();
        let pruned = self.sessions.prune_empty();
        if pruned > 0 {
            debug!(policy = self.policy.as_str(), pruned, "Idle rate limit sessions dropped");
        }
        evicted
    }

    /// Number of sessions currently tracked.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn policy(&self) -> LimitPolicy {
        self.policy
    }

    /// Get the configured maximum calls per window.
    pub fn max_count(&self) -> u32 {
        self.max_count
    }

    /// Get the configured window duration.
    pub fn window(&self) -> Duration {
        self.window
    }
}
