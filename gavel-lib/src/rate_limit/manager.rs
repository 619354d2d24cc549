use ahash::{AHashMap, AHashSet};
use std::sync::Arc;
use std::time::Duration;

use super::{RateLimitResult, RateLimiter};
use crate::clock::Clock;
use crate::config::RateLimitConfig;

/// Manager for per-resource rate limiters
///
/// Holds one [`RateLimiter`] per configured resource plus the allow-list of subjects
/// that bypass every policy.
pub struct RateLimitManager {
    limiters: AHashMap<String, Arc<RateLimiter>>,
    allowlist: AHashSet<String>,
}

impl RateLimitManager {
    /// Create a new rate limit manager from configuration
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let limiters = config
            .resources
            .iter()
            .map(|(name, limit)| {
                let limiter = RateLimiter::new(
                    limit.policy,
                    Duration::from_secs(limit.window_seconds),
                    limit.max_count,
                    clock.clone(),
                );
                (name.clone(), Arc::new(limiter))
            })
            .collect();

        Self { limiters, allowlist: config.allowlist.iter().cloned().collect() }
    }

    /// Check whether `subject` may use `resource` within `session`
    ///
    /// # Returns
    /// * `RateLimitResult::Allowed` if the subject is allow-listed, the resource has no
    ///   limiter, or the policy accepts the call
    /// * `RateLimitResult::Limited` otherwise
    pub fn check(&self, resource: &str, session: &str, subject: &str) -> RateLimitResult {
        if self.is_exempt(subject) {
            return RateLimitResult::unlimited();
        }

        match self.limiters.get(resource) {
            Some(limiter) => limiter.check(session, subject),
            None => RateLimitResult::unlimited(),
        }
    }

    pub fn is_exempt(&self, subject: &str) -> bool {
        self.allowlist.contains(subject)
    }

    pub fn limiter(&self, resource: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(resource).cloned()
    }

    /// Forget every recorded call of every resource.
    pub fn reset(&self) {
        self.limiters.values().for_each(|l| l.reset());
    }

    pub fn compact(&self) -> usize {
        self.limiters.values().map(|l| l.compact()).sum()
    }
}
