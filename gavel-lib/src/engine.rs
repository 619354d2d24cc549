use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheRegistry, SharedCache, TtlStatus};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::escalation::{session_key, EscalationBook, EscalationSelector};
use crate::executor::ActionExecutor;
use crate::persistence::{RestoreStats, Snapshot, SnapshotEntry};
use crate::rate_limit::{RateLimitManager, RateLimitResult};
use crate::telemetry::Metrics;
use crate::vote::{SessionState, VoteAction, VoteCoordinator};

/// Cache holding the last nickname seen per `"<group>:<user>"`.
pub const NICKNAME_CACHE: &str = "nicknames";

/// The moderation state engine.
///
/// Owns every piece of shared state: named caches, rate limiters, escalation records and
/// vote sessions. Handlers and scheduled jobs go through this API only, so each mutation
/// takes the lock of the structure it touches.
pub struct Engine {
    config: Config,
    clock: Arc<dyn Clock>,
    caches: CacheRegistry<String>,
    rate_limits: RateLimitManager,
    escalation: EscalationBook,
    votes: VoteCoordinator,
    executor: Arc<dyn ActionExecutor>,
    metrics: Option<Arc<Metrics>>,
}

impl Engine {
    /// Create an engine. Fails if the escalation table is invalid.
    pub fn new(config: Config, clock: Arc<dyn Clock>, executor: Arc<dyn ActionExecutor>) -> Result<Self> {
        Self::build(config, clock, executor, StdRng::from_entropy(), None)
    }

    /// Create an engine that reports to `metrics`.
    pub fn new_with_metrics(
        config: Config,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ActionExecutor>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        Self::build(config, clock, executor, StdRng::from_entropy(), Some(metrics))
    }

    /// Create an engine whose escalation draws are reproducible.
    pub fn with_rng_seed(
        config: Config,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ActionExecutor>,
        seed: u64,
    ) -> Result<Self> {
        Self::build(config, clock, executor, StdRng::seed_from_u64(seed), None)
    }

    fn build(
        config: Config,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ActionExecutor>,
        rng: StdRng,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let selector = EscalationSelector::new(&config.escalation)?;
        let escalation = EscalationBook::with_rng(
            selector,
            Duration::from_secs(config.escalation.offense_memory_secs),
            clock.clone(),
            rng,
        );
        let rate_limits = RateLimitManager::new(&config.rate_limit, clock.clone());
        let votes =
            VoteCoordinator::new(config.vote.clone(), clock.clone(), executor.clone(), metrics.clone());

        info!(
            resources = config.rate_limit.resources.len(),
            buckets = config.escalation.buckets.len(),
            vote_threshold = config.vote.threshold,
            "Engine initialized"
        );

        Ok(Self {
            caches: CacheRegistry::new(clock.clone()),
            config,
            clock,
            rate_limits,
            escalation,
            votes,
            executor,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    // ---- caches ----

    /// Named cache, created on first use. Use [`SharedCache::with`] for set algebra.
    pub fn cache(&self, name: &str) -> Arc<SharedCache<String>> {
        self.caches.get_or_create(name)
    }

    pub fn cache_set(&self, name: &str, key: &str, value: impl Into<String>, ttl: Option<Duration>) {
        self.cache(name).set(key, value.into(), ttl);
    }

    pub fn cache_get(&self, name: &str, key: &str) -> Option<String> {
        self.caches.get(name)?.get(key)
    }

    pub fn cache_delete(&self, name: &str, key: &str) -> bool {
        self.caches
            .get(name)
            .is_some_and(|cache| cache.delete(key))
    }

    pub fn cache_ttl(&self, name: &str, key: &str) -> TtlStatus {
        self.caches
            .get(name)
            .map_or(TtlStatus::NotExist, |cache| cache.ttl(key))
    }

    // ---- rate limiting ----

    pub fn rate_limiter_check(&self, resource: &str, session: &str, subject: &str) -> RateLimitResult {
        let result = self.rate_limits.check(resource, session, subject);

        if let Some(m) = &self.metrics {
            let policy = self
                .rate_limits
                .limiter(resource)
                .map_or("none", |l| l.policy().as_str());
            if result.is_limited() {
                m.record_rate_limit_rejection(resource, policy);
            } else {
                m.record_rate_limit_allowed(resource, policy);
            }
        }

        if let Some(wait) = result.reset_after() {
            debug!(resource, session, subject, wait_secs = wait.as_secs(), "Rate limited");
        }
        result
    }

    pub fn is_exempt(&self, subject: &str) -> bool {
        self.rate_limits.is_exempt(subject)
    }

    // ---- escalation ----

    /// Draw a penalty for `user` in `group`. A zero duration means no action.
    pub fn escalation_draw(&self, group: &str, user: &str) -> Result<Duration> {
        let duration = self.escalation.draw(&session_key(group, user))?;
        if let Some(m) = &self.metrics {
            m.record_penalty_draw(duration.as_secs());
        }
        Ok(duration)
    }

    pub fn offense_count(&self, group: &str, user: &str) -> u32 {
        self.escalation.offense_count(&session_key(group, user))
    }

    /// Draw a penalty and apply it.
    ///
    /// The offense is recorded before the mute call; a failed mute is logged and counted
    /// but the record stands.
    pub async fn punish(&self, group: &str, user: &str, reason: &str) -> Result<Duration> {
        let duration = self.escalation_draw(group, user)?;
        if duration.is_zero() {
            debug!(group, user, reason, "Offense forgiven");
            return Ok(duration);
        }

        let secs = duration.as_secs();
        info!(group, user, reason, secs, offenses = self.offense_count(group, user), "Penalty applied");

        if let Err(e) = self.executor.mute(group, user, secs).await {
            warn!(group, user, error = %e, "Failed to apply penalty");
            self.record_executor_failure("mute");
        }
        self.announce(group, &format!("{user} muted for {} ({reason}).", format_minutes(secs)))
            .await;
        Ok(duration)
    }

    /// Forget every offense record.
    pub fn reset_escalations(&self) {
        self.escalation.reset();
        info!("Escalation records reset");
    }

    // ---- votes ----

    /// Open a vote session in `group`. `duration_secs` falls back to the configured default.
    pub async fn vote_start(
        &self,
        group: &str,
        initiator: &str,
        duration_secs: Option<u64>,
        reason: &str,
        threshold: Option<usize>,
    ) -> Result<u64> {
        let action = VoteAction {
            duration_secs: duration_secs.unwrap_or(self.config.vote.default_duration_secs),
            reason: reason.to_string(),
        };
        self.votes.start(group, initiator, action, threshold).await
    }

    pub async fn vote_submit(&self, group: &str, voter: &str, target: &str) -> Result<SessionState> {
        self.votes.submit(group, voter, target).await
    }

    /// Cancel `group`'s session. Allow-listed users may cancel any session.
    pub async fn vote_cancel(&self, group: &str, requester: &str) -> Result<()> {
        let privileged = self.rate_limits.is_exempt(requester);
        self.votes.cancel(group, requester, privileged).await
    }

    /// Count a non-ballot event toward the session's inactivity budget.
    pub async fn vote_observe(&self, group: &str) -> Option<SessionState> {
        self.votes.observe(group).await
    }

    pub fn vote_state(&self, group: &str) -> Option<SessionState> {
        self.votes.state(group)
    }

    pub fn active_vote_sessions(&self) -> usize {
        self.votes.active_sessions()
    }

    /// Time out sessions past their deadline.
    pub async fn reap_votes(&self) -> usize {
        self.votes.reap_expired().await
    }

    // ---- maintenance ----

    /// Drop expired entries nobody read. Returns the number of evicted keys.
    pub fn compact_caches(&self) -> usize {
        let evicted =
            self.caches.evict_expired() + self.rate_limits.compact() + self.escalation.compact();
        if let Some(m) = &self.metrics {
            m.record_cache_evictions(evicted);
        }
        debug!(evicted, "Cache compaction finished");
        evicted
    }

    /// Capture live cache entries and escalation records.
    ///
    /// Rate-limit windows are not captured; they restart empty after a restore.
    pub fn snapshot(&self) -> Snapshot {
        let now = self.clock.now_unix_ms();
        let caches = self
            .caches
            .all()
            .into_iter()
            .map(|(name, cache)| {
                let entries = cache.with(|c| {
                    c.entries()
                        .filter(|(_, _, expires)| expires.is_none_or(|at| at > now))
                        .map(|(key, value, expires)| SnapshotEntry {
                            key: key.clone(),
                            value: value.clone(),
                            expires_at_ms: expires,
                        })
                        .collect::<Vec<_>>()
                });
                (name, entries)
            })
            .collect();

        Snapshot { saved_at_ms: now, caches, escalations: self.escalation.records() }
    }

    /// Load `snapshot` into the engine, skipping anything that has expired since it was
    /// taken. Existing keys are overwritten.
    pub fn restore(&self, snapshot: Snapshot) -> RestoreStats {
        let now = self.clock.now_unix_ms();
        let mut stats = RestoreStats::default();

        for (name, entries) in snapshot.caches {
            let cache = self.cache(&name);
            cache.with(|c| {
                for entry in entries {
                    if entry.expires_at_ms.is_some_and(|at| at <= now) {
                        stats.expired += 1;
                        continue;
                    }
                    c.set_until(entry.key, entry.value, entry.expires_at_ms);
                    stats.restored += 1;
                }
            });
        }

        for record in snapshot.escalations {
            if self.escalation.restore(record) {
                stats.restored += 1;
            } else {
                stats.expired += 1;
            }
        }

        info!(
            restored = stats.restored,
            expired = stats.expired,
            age_ms = now.saturating_sub(snapshot.saved_at_ms),
            "Snapshot restored"
        );
        stats
    }

    /// Post `content` to `group`. Failures are logged and counted, never returned.
    pub async fn announce(&self, group: &str, content: &str) {
        if let Err(e) = self.executor.send_message(group, content).await {
            warn!(group, error = %e, "Failed to send message");
            self.record_executor_failure("send_message");
        }
    }

    fn record_executor_failure(&self, action: &str) {
        if let Some(m) = &self.metrics {
            m.record_executor_failure(action);
        }
    }
}

fn format_minutes(secs: u64) -> String {
    if secs % 60 != 0 {
        return format!("{secs} seconds");
    }
    match secs / 60 {
        1 => "1 minute".to_string(),
        minutes => format!("{minutes} minutes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_formatting() {
        assert_eq!(format_minutes(60), "1 minute");
        assert_eq!(format_minutes(600), "10 minutes");
        assert_eq!(format_minutes(90), "90 seconds");
    }
}
