mod common;

use common::{engine_with, RecordingExecutor, T0};
use gavel_lib::clock::ManualClock;
use gavel_lib::config::{Config, VoteConfig};
use gavel_lib::vote::{SessionState, VoteAction, VoteCoordinator};
use gavel_lib::GavelError;
use std::sync::Arc;
use std::time::Duration;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn coordinator(config: VoteConfig) -> (Arc<VoteCoordinator>, Arc<ManualClock>, Arc<RecordingExecutor>) {
    let clock = Arc::new(ManualClock::new(T0));
    let executor = RecordingExecutor::new();
    let coordinator = VoteCoordinator::new(config, clock.clone(), executor.clone(), None);
    (Arc::new(coordinator), clock, executor)
}

fn action() -> VoteAction {
    VoteAction { duration_secs: 600, reason: "spam".to_string() }
}

#[tokio::test]
async fn threshold_votes_fire_exactly_one_mute() -> TestResult {
    let (votes, _, executor) = coordinator(VoteConfig::default());
    votes.start("g1", "admin", action(), Some(3)).await?;

    assert_eq!(votes.submit("g1", "v1", "T").await?, SessionState::Collecting { votes: 1, threshold: 3 });
    assert_eq!(votes.submit("g1", "v2", "T").await?, SessionState::Collecting { votes: 2, threshold: 3 });
    let state = votes.submit("g1", "v3", "T").await?;
    assert_eq!(
        state,
        SessionState::Resolved {
            target: "T".to_string(),
            voters: vec!["v1".to_string(), "v2".to_string(), "v3".to_string()],
        }
    );
    assert_eq!(executor.mutes(), vec![("g1".to_string(), "T".to_string(), 600)]);

    // The session is gone; a 4th vote finds nothing to join.
    let late = votes.submit("g1", "v4", "T").await;
    assert!(matches!(late, Err(GavelError::NoActiveSession { .. })), "got {late:?}");
    assert_eq!(executor.mute_count(), 1);
    Ok(())
}

#[tokio::test]
async fn resolution_broadcast_lists_voters() -> TestResult {
    let (votes, _, executor) = coordinator(VoteConfig::default());
    votes.start("g1", "admin", action(), Some(2)).await?;
    votes.submit("g1", "alice", "T").await?;
    votes.submit("g1", "bob", "T").await?;

    let messages = executor.messages();
    let last = messages.last().ok_or("no broadcast")?;
    assert!(last.1.contains("alice, bob"), "unexpected broadcast: {}", last.1);
    Ok(())
}

#[tokio::test]
async fn second_ballot_from_same_voter_is_rejected() -> TestResult {
    let (votes, _, executor) = coordinator(VoteConfig::default());
    votes.start("g1", "admin", action(), Some(3)).await?;

    votes.submit("g1", "v1", "T").await?;
    for target in ["T", "U"] {
        let result = votes.submit("g1", "v1", target).await;
        assert!(matches!(result, Err(GavelError::AlreadyVoted { .. })), "got {result:?}");
    }

    assert_eq!(votes.state("g1"), Some(SessionState::Collecting { votes: 1, threshold: 3 }));
    assert!(executor
        .messages()
        .iter()
        .any(|(_, content)| content.contains("already voted")));
    Ok(())
}

#[tokio::test]
async fn only_one_collecting_session_per_group() -> TestResult {
    let (votes, _, _) = coordinator(VoteConfig::default());
    votes.start("g1", "admin", action(), None).await?;

    let second = votes.start("g1", "other", action(), None).await;
    assert!(matches!(second, Err(GavelError::SessionAlreadyActive { .. })), "got {second:?}");

    // Other groups are independent.
    votes.start("g2", "admin", action(), None).await?;
    assert_eq!(votes.active_sessions(), 2);
    Ok(())
}

#[tokio::test]
async fn slot_is_released_after_resolution() -> TestResult {
    let (votes, _, _) = coordinator(VoteConfig::default());
    votes.start("g1", "admin", action(), Some(1)).await?;
    votes.submit("g1", "v1", "T").await?;

    assert_eq!(votes.active_sessions(), 0);
    votes.start("g1", "admin", action(), Some(1)).await?;
    Ok(())
}

#[tokio::test]
async fn invalid_candidates_are_discarded() -> TestResult {
    let config = VoteConfig { protected_users: vec!["owner".to_string()], ..VoteConfig::default() };
    let (votes, _, executor) = coordinator(config);
    votes.start("g1", "admin", action(), Some(1)).await?;

    for target in ["", "bad target", "owner", "0"] {
        let result = votes.submit("g1", "v1", target).await;
        assert!(matches!(result, Err(GavelError::InvalidCandidate(_))), "{target:?}: {result:?}");
    }

    // None of them counted as the voter's ballot.
    votes.submit("g1", "v1", "T").await?;
    assert_eq!(executor.mute_count(), 1);
    Ok(())
}

#[tokio::test]
async fn inactivity_budget_times_out_session() -> TestResult {
    let config = VoteConfig { inactivity_budget: 2, ..VoteConfig::default() };
    let (votes, _, executor) = coordinator(config);
    votes.start("g1", "admin", action(), Some(3)).await?;

    assert!(matches!(votes.observe("g1").await, Some(SessionState::Collecting { .. })));
    assert!(matches!(votes.observe("g1").await, Some(SessionState::Collecting { .. })));
    assert_eq!(votes.observe("g1").await, Some(SessionState::TimedOut));

    assert_eq!(votes.active_sessions(), 0);
    assert_eq!(executor.mute_count(), 0);
    Ok(())
}

#[tokio::test]
async fn accepted_ballot_resets_inactivity() -> TestResult {
    let config = VoteConfig { inactivity_budget: 1, ..VoteConfig::default() };
    let (votes, _, _) = coordinator(config);
    votes.start("g1", "admin", action(), Some(5)).await?;

    for voter in ["v1", "v2", "v3"] {
        votes.observe("g1").await;
        votes.submit("g1", voter, "T").await?;
    }
    assert_eq!(votes.state("g1"), Some(SessionState::Collecting { votes: 3, threshold: 5 }));
    Ok(())
}

#[tokio::test]
async fn legacy_sentinel_resets_inactivity() -> TestResult {
    let config = VoteConfig { inactivity_budget: 1, ..VoteConfig::default() };
    let (votes, _, _) = coordinator(config);
    votes.start("g1", "admin", action(), Some(3)).await?;

    for _ in 0..5 {
        votes.observe("g1").await;
        let _ = votes.submit("g1", "v1", "0").await;
    }
    assert!(matches!(votes.state("g1"), Some(SessionState::Collecting { .. })));

    // Malformed targets count against the budget instead.
    votes.observe("g1").await;
    let result = votes.submit("g1", "v1", "not valid").await?;
    assert_eq!(result, SessionState::TimedOut);
    Ok(())
}

#[tokio::test]
async fn deadline_reaper_times_out_sessions() -> TestResult {
    let config = VoteConfig { timeout_secs: 60, ..VoteConfig::default() };
    let (votes, clock, executor) = coordinator(config);
    votes.start("g1", "admin", action(), None).await?;
    votes.start("g2", "admin", action(), None).await?;

    clock.advance(Duration::from_secs(59));
    assert_eq!(votes.reap_expired().await, 0);

    clock.advance(Duration::from_secs(1));
    assert_eq!(votes.reap_expired().await, 2);
    assert_eq!(votes.active_sessions(), 0);
    assert_eq!(executor.mute_count(), 0);
    Ok(())
}

#[tokio::test]
async fn ballot_after_deadline_times_out() -> TestResult {
    let config = VoteConfig { timeout_secs: 10, ..VoteConfig::default() };
    let (votes, clock, executor) = coordinator(config);
    votes.start("g1", "admin", action(), Some(1)).await?;

    clock.advance(Duration::from_secs(10));
    assert_eq!(votes.submit("g1", "v1", "T").await?, SessionState::TimedOut);
    assert_eq!(executor.mute_count(), 0);
    assert_eq!(votes.active_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn only_initiator_or_privileged_may_cancel() -> TestResult {
    let (votes, _, _) = coordinator(VoteConfig::default());
    votes.start("g1", "alice", action(), None).await?;

    let denied = votes.cancel("g1", "mallory", false).await;
    assert!(matches!(denied, Err(GavelError::NotPermitted { .. })), "got {denied:?}");

    votes.cancel("g1", "alice", false).await?;
    assert_eq!(votes.active_sessions(), 0);

    votes.start("g1", "alice", action(), None).await?;
    votes.cancel("g1", "moderator", true).await?;

    let missing = votes.cancel("g1", "alice", false).await;
    assert!(matches!(missing, Err(GavelError::NoActiveSession { .. })), "got {missing:?}");
    Ok(())
}

#[tokio::test]
async fn failed_mute_still_resolves() -> TestResult {
    let clock = Arc::new(ManualClock::new(T0));
    let executor = RecordingExecutor::failing();
    let votes = VoteCoordinator::new(VoteConfig::default(), clock, executor.clone(), None);
    votes.start("g1", "admin", action(), Some(1)).await?;

    let state = votes.submit("g1", "v1", "T").await?;
    assert!(matches!(state, SessionState::Resolved { .. }));
    assert_eq!(executor.mute_count(), 1);
    assert_eq!(votes.active_sessions(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_d_concurrent_threshold_fires_once() -> TestResult {
    for round in 0..200 {
        let (votes, _, executor) = coordinator(VoteConfig::default());
        votes.start("g1", "admin", action(), Some(3)).await?;

        let handles: Vec<_> = ["v1", "v2", "v3", "v4", "v5"]
            .into_iter()
            .map(|voter| {
                let votes = votes.clone();
                tokio::spawn(async move { votes.submit("g1", voter, "T").await })
            })
            .collect();

        let mut resolved = 0;
        for handle in handles {
            if let Ok(SessionState::Resolved { voters, .. }) = handle.await? {
                assert_eq!(voters.len(), 3);
                resolved += 1;
            }
        }

        assert_eq!(resolved, 1, "round {round}: {resolved} callers saw the resolution");
        assert_eq!(executor.mute_count(), 1, "round {round}: mute fired {} times", executor.mute_count());
    }
    Ok(())
}

#[tokio::test]
async fn engine_vote_flow_uses_configured_defaults() -> TestResult {
    let config = Config {
        vote: VoteConfig { threshold: 2, default_duration_secs: 120, ..VoteConfig::default() },
        ..Config::default()
    };
    let (engine, _, executor) = engine_with(config);

    engine.vote_start("g1", "admin", None, "noise", None).await?;
    engine.vote_submit("g1", "v1", "T").await?;
    engine.vote_submit("g1", "v2", "T").await?;

    assert_eq!(executor.mutes(), vec![("g1".to_string(), "T".to_string(), 120)]);
    assert_eq!(engine.vote_state("g1"), None);
    Ok(())
}

#[tokio::test]
async fn allowlisted_user_may_cancel_any_session() -> TestResult {
    let mut config = Config::default();
    config.rate_limit.allowlist = vec!["mod".to_string()];
    let (engine, _, _) = engine_with(config);

    engine.vote_start("g1", "alice", Some(60), "noise", None).await?;
    assert!(engine.vote_cancel("g1", "bob").await.is_err());
    engine.vote_cancel("g1", "mod").await?;
    assert_eq!(engine.active_vote_sessions(), 0);

    let (plain, _, _) = common::engine();
    plain.vote_start("g1", "alice", None, "noise", None).await?;
    assert!(plain.vote_cancel("g1", "mod").await.is_err());
    Ok(())
}
