//! Single vote session state machine.
//!
//! ```text
//! Collecting ──threshold reached──▶ Resolved(target)
//!     │ ──deadline / inactivity──▶ TimedOut
//!     └ ──explicit cancel────────▶ Cancelled
//! ```
//!
//! The session is clock-agnostic: callers pass the current instant. It holds no lock of
//! its own; the coordinator wraps it in a mutex so that recording a ballot and checking
//! the threshold happen as one step.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{GavelError, Result};

/// Penalty applied to the winning target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteAction {
    pub duration_secs: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Still accepting ballots. `votes` is the leading target's tally.
    Collecting { votes: usize, threshold: usize },
    /// `target` reached the threshold; `voters` are the ballots that put it there.
    Resolved { target: String, voters: Vec<String> },
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Collecting { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Collecting { .. } => "collecting",
            SessionState::Resolved { .. } => "resolved",
            SessionState::TimedOut => "timed_out",
            SessionState::Cancelled => "cancelled",
        }
    }
}

/// How a proposed vote target is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    Valid,
    /// Placeholder id sent by legacy clients. Discarded, but it counts as activity.
    Sentinel,
    Invalid,
}

/// Rules for recognizing vote targets.
#[derive(Debug, Clone, Default)]
pub struct CandidatePolicy {
    sentinels: AHashSet<String>,
    protected: AHashSet<String>,
}

impl CandidatePolicy {
    pub fn new(
        sentinels: impl IntoIterator<Item = String>,
        protected: impl IntoIterator<Item = String>,
    ) -> Self {
        Self { sentinels: sentinels.into_iter().collect(), protected: protected.into_iter().collect() }
    }

    pub fn classify(&self, target: &str) -> Candidate {
        if self.sentinels.contains(target) {
            return Candidate::Sentinel;
        }
        let well_formed = !target.is_empty()
            && target
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !well_formed || self.protected.contains(target) {
            return Candidate::Invalid;
        }
        Candidate::Valid
    }
}

#[derive(Debug)]
pub struct VoteSession {
    id: u64,
    group: String,
    initiator: String,
    action: VoteAction,
    threshold: usize,
    deadline_ms: u64,
    inactivity: u32,
    inactivity_budget: u32,
    // Voters per target in arrival order.
    votes_by_target: AHashMap<String, Vec<String>>,
    voted: AHashSet<String>,
    state: SessionState,
}

impl VoteSession {
    pub fn new(
        id: u64,
        group: impl Into<String>,
        initiator: impl Into<String>,
        action: VoteAction,
        threshold: usize,
        deadline_ms: u64,
        inactivity_budget: u32,
    ) -> Self {
        let threshold = threshold.max(1);
        Self {
            id,
            group: group.into(),
            initiator: initiator.into(),
            action,
            threshold,
            deadline_ms,
            inactivity: 0,
            inactivity_budget,
            votes_by_target: AHashMap::new(),
            voted: AHashSet::new(),
            state: SessionState::Collecting { votes: 0, threshold },
        }
    }

    /// Apply one ballot.
    ///
    /// Returns the state after the ballot. Discarded ballots return
    /// [`GavelError::InvalidCandidate`] or [`GavelError::AlreadyVoted`] unless discarding
    /// them exhausted the inactivity budget, in which case `TimedOut` is returned.
    pub fn cast(
        &mut self,
        voter: &str,
        target: &str,
        candidate: Candidate,
        now_ms: u64,
    ) -> Result<SessionState> {
        self.ensure_collecting()?;
        if self.expire_if_due(now_ms) {
            return Ok(self.state.clone());
        }

        match candidate {
            Candidate::Sentinel => {
                self.inactivity = 0;
                return Err(GavelError::InvalidCandidate(target.to_string()));
            }
            Candidate::Invalid => {
                if self.tick_inactivity() {
                    return Ok(self.state.clone());
                }
                return Err(GavelError::InvalidCandidate(target.to_string()));
            }
            Candidate::Valid => {}
        }

        if self.voted.contains(voter) {
            if self.tick_inactivity() {
                return Ok(self.state.clone());
            }
            return Err(GavelError::AlreadyVoted { voter: voter.to_string() });
        }

        self.voted.insert(voter.to_string());
        let voters = self.votes_by_target.entry(target.to_string()).or_default();
        voters.push(voter.to_string());
        let tally = voters.len();
        self.inactivity = 0;

        if tally >= self.threshold {
            self.state = SessionState::Resolved { target: target.to_string(), voters: voters.clone() };
        } else {
            self.state = SessionState::Collecting { votes: self.leading(), threshold: self.threshold };
        }
        Ok(self.state.clone())
    }

    /// Record an event that is not a ballot.
    pub fn observe(&mut self, now_ms: u64) -> Result<SessionState> {
        self.ensure_collecting()?;
        if !self.expire_if_due(now_ms) {
            self.tick_inactivity();
        }
        Ok(self.state.clone())
    }

    /// Time the session out if its deadline has passed. Returns whether it did.
    pub fn expire_if_due(&mut self, now_ms: u64) -> bool {
        if self.is_collecting() && now_ms >= self.deadline_ms {
            self.state = SessionState::TimedOut;
            return true;
        }
        false
    }

    /// Returns whether the session was collecting.
    pub fn cancel(&mut self) -> bool {
        if !self.is_collecting() {
            return false;
        }
        self.state = SessionState::Cancelled;
        true
    }

    // Returns true when the increment exhausted the budget.
    fn tick_inactivity(&mut self) -> bool {
        self.inactivity = self.inactivity.saturating_add(1);
        if self.inactivity > self.inactivity_budget {
            self.state = SessionState::TimedOut;
            return true;
        }
        false
    }

    fn leading(&self) -> usize {
        self.votes_by_target
            .values()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    fn ensure_collecting(&self) -> Result<()> {
        if self.is_collecting() {
            Ok(())
        } else {
            Err(GavelError::NoActiveSession { group: self.group.clone() })
        }
    }

    pub fn is_collecting(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn initiator(&self) -> &str {
        &self.initiator
    }

    pub fn action(&self) -> &VoteAction {
        &self.action
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    pub fn inactivity(&self) -> u32 {
        self.inactivity
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn votes_for(&self, target: &str) -> &[String] {
        self.votes_by_target
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(threshold: usize, budget: u32) -> VoteSession {
        VoteSession::new(
            1,
            "g1",
            "admin",
            VoteAction { duration_secs: 600, reason: "spam".into() },
            threshold,
            10_000,
            budget,
        )
    }

    #[test]
    fn test_resolves_at_threshold() {
        let mut s = session(2, 5);
        let first = s.cast("v1", "42", Candidate::Valid, 0);
        assert!(matches!(first, Ok(SessionState::Collecting { votes: 1, threshold: 2 })));

        let second = s.cast("v2", "42", Candidate::Valid, 0);
        match second {
            Ok(SessionState::Resolved { target, voters }) => {
                assert_eq!(target, "42");
                assert_eq!(voters, vec!["v1".to_string(), "v2".to_string()]);
            }
            other => panic!("expected resolution, got {other:?}"),
        }

        // Terminal: further ballots are refused.
        assert!(matches!(
            s.cast("v3", "42", Candidate::Valid, 0),
            Err(GavelError::NoActiveSession { .. })
        ));
    }

    #[test]
    fn test_duplicate_voter_is_rejected_for_any_target() {
        let mut s = session(3, 5);
        assert!(s.cast("v1", "42", Candidate::Valid, 0).is_ok());
        assert!(matches!(
            s.cast("v1", "43", Candidate::Valid, 0),
            Err(GavelError::AlreadyVoted { .. })
        ));
        assert_eq!(s.votes_for("42").len(), 1);
        assert!(s.votes_for("43").is_empty());
    }

    #[test]
    fn test_invalid_candidate_counts_against_inactivity() {
        let mut s = session(3, 1);
        assert!(matches!(
            s.cast("v1", "not a user", Candidate::Invalid, 0),
            Err(GavelError::InvalidCandidate(_))
        ));
        assert_eq!(s.inactivity(), 1);
        assert!(matches!(s.cast("v2", "??", Candidate::Invalid, 0), Ok(SessionState::TimedOut)));
    }

    #[test]
    fn test_sentinel_resets_inactivity() {
        let mut s = session(3, 2);
        assert!(s.observe(0).is_ok());
        assert!(s.observe(0).is_ok());
        assert_eq!(s.inactivity(), 2);

        assert!(s.cast("v1", "0", Candidate::Sentinel, 0).is_err());
        assert_eq!(s.inactivity(), 0);
        assert!(s.is_collecting());
    }

    #[test]
    fn test_accepted_vote_resets_inactivity() {
        let mut s = session(3, 5);
        for _ in 0..4 {
            assert!(s.observe(0).is_ok());
        }
        assert!(s.cast("v1", "42", Candidate::Valid, 0).is_ok());
        assert_eq!(s.inactivity(), 0);
    }

    #[test]
    fn test_deadline_times_out() {
        let mut s = session(3, 5);
        assert!(!s.expire_if_due(9_999));
        assert!(matches!(s.cast("v1", "42", Candidate::Valid, 10_000), Ok(SessionState::TimedOut)));
        assert!(s.votes_for("42").is_empty());
    }

    #[test]
    fn test_cancel_only_once() {
        let mut s = session(3, 5);
        assert!(s.cancel());
        assert!(!s.cancel());
        assert_eq!(s.state(), &SessionState::Cancelled);
    }

    #[test]
    fn test_candidate_policy() {
        let policy = CandidatePolicy::new(vec!["0".to_string()], vec!["1000".to_string()]);
        assert_eq!(policy.classify("12345"), Candidate::Valid);
        assert_eq!(policy.classify("0"), Candidate::Sentinel);
        assert_eq!(policy.classify("1000"), Candidate::Invalid);
        assert_eq!(policy.classify(""), Candidate::Invalid);
        assert_eq!(policy.classify("12 34"), Candidate::Invalid);
    }
}
