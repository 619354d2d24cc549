use ahash::AHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::session::{CandidatePolicy, SessionState, VoteAction, VoteSession};
use crate::clock::Clock;
use crate::config::VoteConfig;
use crate::error::{GavelError, Result};
use crate::executor::ActionExecutor;
use crate::telemetry::Metrics;

type SessionSlot = Arc<Mutex<VoteSession>>;

/// Runs at most one vote session per group.
///
/// Each session sits behind its own mutex: registering a ballot, checking the threshold
/// and moving to a terminal state happen under that lock, so only one caller ever
/// observes the transition and the action fires exactly once. The executor is called
/// after the lock is released.
pub struct VoteCoordinator {
    slots: Mutex<AHashMap<String, SessionSlot>>,
    executor: Arc<dyn ActionExecutor>,
    clock: Arc<dyn Clock>,
    config: VoteConfig,
    candidates: CandidatePolicy,
    next_id: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl VoteCoordinator {
    pub fn new(
        config: VoteConfig,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ActionExecutor>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let candidates = CandidatePolicy::new(
            config.legacy_sentinels.iter().cloned(),
            config.protected_users.iter().cloned(),
        );
        Self {
            slots: Mutex::new(AHashMap::new()),
            executor,
            clock,
            config,
            candidates,
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Open a session in `group`.
    ///
    /// `threshold` falls back to the configured one. Fails with
    /// [`GavelError::SessionAlreadyActive`] while another session is collecting.
    pub async fn start(
        &self,
        group: &str,
        initiator: &str,
        action: VoteAction,
        threshold: Option<usize>,
    ) -> Result<u64> {
        let threshold = threshold.unwrap_or(self.config.threshold).max(1);
        let id = {
            let mut slots = self.lock_slots();
            if let Some(existing) = slots.get(group) {
                if lock_session(existing).is_collecting() {
                    return Err(GavelError::SessionAlreadyActive { group: group.to_string() });
                }
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let deadline = self
                .clock
                .now_unix_ms()
                .saturating_add(self.config.timeout_secs.saturating_mul(1000));
            let session = VoteSession::new(
                id,
                group,
                initiator,
                action.clone(),
                threshold,
                deadline,
                self.config.inactivity_budget,
            );
            slots.insert(group.to_string(), Arc::new(Mutex::new(session)));
            id
        };

        info!(group, initiator, session = id, threshold, reason = %action.reason, "Vote session started");
        if let Some(m) = &self.metrics {
            m.record_vote_session_started();
        }
        self.announce(
            group,
            &format!(
                "Vote started by {initiator}: {} ({}s mute). {threshold} votes needed.",
                action.reason, action.duration_secs
            ),
        )
        .await;
        Ok(id)
    }

    /// Register `voter`'s ballot for `target` in `group`'s session.
    pub async fn submit(&self, group: &str, voter: &str, target: &str) -> Result<SessionState> {
        let slot = self.slot(group)?;
        let candidate = self.candidates.classify(target);

        let (result, finished) = {
            let mut session = lock_session(&slot);
            let was_collecting = session.is_collecting();
            let result = session.cast(voter, target, candidate, self.clock.now_unix_ms());
            let finished = if was_collecting && !session.is_collecting() {
                Some(session.action().clone())
            } else {
                None
            };
            (result, finished)
        };

        if let Some(m) = &self.metrics {
            m.record_vote(outcome_label(&result));
        }

        match &result {
            Ok(state) => {
                debug!(group, voter, target, state = state.as_str(), "Vote counted");
            }
            Err(GavelError::AlreadyVoted { .. }) => {
                debug!(group, voter, "Duplicate vote discarded");
                self.announce(group, &format!("{voter}, you have already voted.")).await;
            }
            Err(e) => {
                debug!(group, voter, target, error = %e, "Vote discarded");
            }
        }

        if let Some(action) = finished {
            let state = lock_session(&slot).state().clone();
            self.release(group, &slot);
            self.finish(group, &state, &action).await;
        }
        result
    }

    /// Count a non-ballot event toward `group`'s inactivity budget.
    ///
    /// Returns the session state, or `None` if no session is collecting.
    pub async fn observe(&self, group: &str) -> Option<SessionState> {
        let slot = self.slot(group).ok()?;
        let (state, finished) = {
            let mut session = lock_session(&slot);
            let state = session.observe(self.clock.now_unix_ms()).ok()?;
            let finished = if state.is_terminal() { Some(session.action().clone()) } else { None };
            (state, finished)
        };

        if let Some(action) = finished {
            self.release(group, &slot);
            self.finish(group, &state, &action).await;
        }
        Some(state)
    }

    /// Cancel `group`'s session.
    ///
    /// Only the initiator may cancel unless `privileged` is set.
    pub async fn cancel(&self, group: &str, requester: &str, privileged: bool) -> Result<()> {
        let slot = self.slot(group)?;
        let action = {
            let mut session = lock_session(&slot);
            if !privileged && session.initiator() != requester {
                return Err(GavelError::NotPermitted { user: requester.to_string() });
            }
            if !session.cancel() {
                return Err(GavelError::NoActiveSession { group: group.to_string() });
            }
            session.action().clone()
        };

        info!(group, requester, "Vote session cancelled");
        self.release(group, &slot);
        self.finish(group, &SessionState::Cancelled, &action).await;
        Ok(())
    }

    /// Time out every session whose deadline has passed. Returns how many were closed.
    pub async fn reap_expired(&self) -> usize {
        let now = self.clock.now_unix_ms();
        let due: Vec<(String, SessionSlot, VoteAction)> = {
            let slots = self.lock_slots();
            slots
                .iter()
                .filter_map(|(group, slot)| {
                    let mut session = lock_session(slot);
                    if !session.expire_if_due(now) {
                        return None;
                    }
                    let action = session.action().clone();
                    Some((group.clone(), slot.clone(), action))
                })
                .collect()
        };

        for (group, slot, action) in &due {
            self.release(group, slot);
            self.finish(group, &SessionState::TimedOut, action).await;
        }
        due.len()
    }

    /// State of `group`'s collecting session.
    pub fn state(&self, group: &str) -> Option<SessionState> {
        let slot = self.slot(group).ok()?;
        let session = lock_session(&slot);
        Some(session.state().clone())
    }

    pub fn active_sessions(&self) -> usize {
        self.lock_slots().len()
    }

    fn slot(&self, group: &str) -> Result<SessionSlot> {
        self.lock_slots()
            .get(group)
            .cloned()
            .ok_or_else(|| GavelError::NoActiveSession { group: group.to_string() })
    }

    // Free the group's slot if it still holds this session.
    fn release(&self, group: &str, slot: &SessionSlot) {
        let mut slots = self.lock_slots();
        if slots.get(group).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(group);
        }
    }

    async fn finish(&self, group: &str, state: &SessionState, action: &VoteAction) {
        if let Some(m) = &self.metrics {
            m.record_vote_session_closed(state.as_str());
        }

        match state {
            SessionState::Resolved { target, voters } => {
                info!(group, target, voters = voters.len(), secs = action.duration_secs, "Vote resolved");
                // The decision stands even if the mute call fails.
                if let Err(e) = self.executor.mute(group, target, action.duration_secs).await {
                    warn!(group, target, error = %e, "Failed to apply vote result");
                    if let Some(m) = &self.metrics {
                        m.record_executor_failure("mute");
                    }
                }
                self.announce(
                    group,
                    &format!(
                        "Vote passed: {target} muted for {}s ({}). Voters: {}",
                        action.duration_secs,
                        action.reason,
                        voters.join(", ")
                    ),
                )
                .await;
            }
            SessionState::TimedOut => {
                info!(group, "Vote timed out");
                self.announce(group, "Vote timed out, no action taken.").await;
            }
            SessionState::Cancelled => {
                self.announce(group, "Vote cancelled.").await;
            }
            SessionState::Collecting { .. } => {}
        }
    }

    async fn announce(&self, group: &str, content: &str) {
        if let Err(e) = self.executor.send_message(group, content).await {
            warn!(group, error = %e, "Failed to send vote announcement");
            if let Some(m) = &self.metrics {
                m.record_executor_failure("send_message");
            }
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, AHashMap<String, SessionSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            warn!("Vote slot table lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

fn lock_session(slot: &SessionSlot) -> MutexGuard<'_, VoteSession> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn outcome_label(result: &Result<SessionState>) -> &'static str {
    match result {
        Ok(state) => state.as_str(),
        Err(GavelError::AlreadyVoted { .. }) => "duplicate",
        Err(GavelError::InvalidCandidate(_)) => "invalid",
        Err(_) => "rejected",
    }
}
