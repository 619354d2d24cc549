use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::engine::{Engine, NICKNAME_CACHE};
use crate::error::{GavelError, Result};
use crate::escalation::session_key;
use crate::events::{InboundEvent, Payload};
use crate::guard::GuardChain;
use crate::vote::SessionState;

pub const MESSAGE_RESOURCE: &str = "message";
pub const POKE_RESOURCE: &str = "poke";
pub const VOTE_START_RESOURCE: &str = "vote_start";

/// Notice kind emitted when a member leaves a group.
pub const MEMBER_LEAVE: &str = "member_leave";

/// What the router did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A guard predicate rejected the event.
    Dropped { predicate: &'static str },
    Handled,
    /// The sender hit a rate limit and nothing else happened.
    Limited { resource: &'static str, reset_after: Duration },
    /// The sender flooded or offended; `duration` is zero when the draw forgave them.
    Penalized { duration: Duration },
    /// The event was a ballot.
    Voted(SessionState),
    VoteStarted { session: u64 },
}

/// Routes inbound events to the engine.
pub struct Router {
    engine: Arc<Engine>,
    guards: GuardChain,
}

impl Router {
    /// Router with the guard chain built from the engine's configuration.
    pub fn new(engine: Arc<Engine>) -> Self {
        let guards = GuardChain::from_config(&engine.config().guard);
        Self { engine, guards }
    }

    pub fn with_guards(engine: Arc<Engine>, guards: GuardChain) -> Self {
        Self { engine, guards }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Handle one event.
    ///
    /// Errors are per-event (a duplicate ballot, a second vote start) and never leave the
    /// engine in a partial state.
    pub async fn dispatch(&self, event: &InboundEvent) -> Result<RouteOutcome> {
        let kind = event.kind();
        if let Some(m) = self.engine.metrics() {
            m.record_event(kind);
        }

        if let Some(predicate) = self.guards.evaluate(event) {
            debug!(group = %event.group_id, user = %event.user_id, kind, predicate, "Event dropped by guard");
            if let Some(m) = self.engine.metrics() {
                m.record_guard_rejection(predicate);
            }
            return Ok(RouteOutcome::Dropped { predicate });
        }

        let group = event.group_id.as_str();
        let user = event.user_id.as_str();

        match &event.payload {
            Payload::Message { nickname, .. } => self.on_message(group, user, nickname.as_deref()).await,
            Payload::Poke { target } => self.on_poke(group, user, target).await,
            Payload::Notice { kind } => {
                if kind == MEMBER_LEAVE {
                    self.engine.cache_delete(NICKNAME_CACHE, &session_key(group, user));
                }
                self.engine.vote_observe(group).await;
                Ok(RouteOutcome::Handled)
            }
            Payload::VoteStart { duration_secs, reason, threshold } => {
                // Refuse before the cooldown is spent on a start that cannot succeed.
                if self.engine.vote_state(group).is_some() {
                    return Err(GavelError::SessionAlreadyActive { group: group.to_string() });
                }
                let check = self.engine.rate_limiter_check(VOTE_START_RESOURCE, group, user);
                if let Some(reset_after) = check.reset_after() {
                    return Ok(RouteOutcome::Limited { resource: VOTE_START_RESOURCE, reset_after });
                }
                let session = self
                    .engine
                    .vote_start(group, user, *duration_secs, reason, *threshold)
                    .await?;
                Ok(RouteOutcome::VoteStarted { session })
            }
            Payload::Vote { target } => {
                let state = self.engine.vote_submit(group, user, target).await?;
                Ok(RouteOutcome::Voted(state))
            }
            Payload::VoteCancel => {
                self.engine.vote_cancel(group, user).await?;
                Ok(RouteOutcome::Handled)
            }
            Payload::Offense { reason } => {
                let duration = self.engine.punish(group, user, reason).await?;
                Ok(RouteOutcome::Penalized { duration })
            }
        }
    }

    async fn on_message(&self, group: &str, user: &str, nickname: Option<&str>) -> Result<RouteOutcome> {
        if let Some(nickname) = nickname {
            let ttl = Duration::from_secs(self.engine.config().cache.nickname_ttl_secs);
            self.engine
                .cache_set(NICKNAME_CACHE, &session_key(group, user), nickname, Some(ttl));
        }

        self.engine.vote_observe(group).await;

        let check = self
            .engine
            .rate_limiter_check(MESSAGE_RESOURCE, &session_key(group, user), user);
        if check.is_allowed() {
            return Ok(RouteOutcome::Handled);
        }

        let duration = self.engine.punish(group, user, "flooding").await?;
        Ok(RouteOutcome::Penalized { duration })
    }

    async fn on_poke(&self, group: &str, user: &str, target: &str) -> Result<RouteOutcome> {
        let check = self.engine.rate_limiter_check(POKE_RESOURCE, group, user);
        if let Some(reset_after) = check.reset_after() {
            return Ok(RouteOutcome::Limited { resource: POKE_RESOURCE, reset_after });
        }

        let name = self
            .engine
            .cache_get(NICKNAME_CACHE, &session_key(group, target))
            .unwrap_or_else(|| target.to_string());
        self.engine.announce(group, &format!("{name} was poked.")).await;
        Ok(RouteOutcome::Handled)
    }
}
