//! Threshold voting on moderation actions.
//!
//! A session collects one ballot per voter until some target gathers `threshold`
//! ballots (the action fires against it), the deadline or inactivity budget runs out, or
//! it is cancelled. Only one session per group may be collecting at a time.

mod coordinator;
mod session;

pub use coordinator::VoteCoordinator;
pub use session::{Candidate, CandidatePolicy, SessionState, VoteAction, VoteSession};
