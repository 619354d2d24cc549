//! Periodic maintenance jobs.
//!
//! Every job calls the public [`Engine`] API, so it takes the same locks as the event
//! handlers running beside it. All jobs stop when the shared [`CancellationToken`] is
//! cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::persistence::SnapshotStore;

/// How often vote deadlines are checked.
pub const VOTE_REAP_INTERVAL: Duration = Duration::from_secs(1);

pub struct Scheduler {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    token: CancellationToken,
}

impl Scheduler {
    /// Spawn every job enabled by the engine's configuration.
    ///
    /// The snapshot job runs only when `store` is given.
    pub fn spawn(engine: Arc<Engine>, store: Option<SnapshotStore>, token: CancellationToken) -> Self {
        let config = engine.config().clone();
        let mut scheduler = Self { handles: Vec::new(), token };

        scheduler.every("vote_reaper", VOTE_REAP_INTERVAL, engine.clone(), |engine| async move {
            let reaped = engine.reap_votes().await;
            if reaped > 0 {
                debug!(reaped, "Expired vote sessions closed");
            }
        });

        scheduler.every(
            "escalation_reset",
            Duration::from_secs(config.escalation.reset_interval_secs),
            engine.clone(),
            |engine| async move { engine.reset_escalations() },
        );

        if let Some(secs) = config.cache.compaction_interval_secs {
            scheduler.every("cache_compaction", Duration::from_secs(secs), engine.clone(), |engine| async move {
                engine.compact_caches();
            });
        }

        if let Some(store) = store {
            let store = Arc::new(store);
            scheduler.every(
                "snapshot",
                Duration::from_secs(config.persistence.snapshot_interval_secs),
                engine,
                move |engine| {
                    let store = store.clone();
                    async move {
                        save_snapshot(&engine, &store).await;
                    }
                },
            );
        }

        info!(jobs = scheduler.handles.len(), "Scheduler started");
        scheduler
    }

    fn every<F, Fut>(&mut self, name: &'static str, period: Duration, engine: Arc<Engine>, job: F)
    where
        F: Fn(Arc<Engine>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            warn!(job = name, "Job disabled: zero interval");
            return;
        }

        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => job(engine.clone()).await,
                }
            }
            debug!(job = name, "Job stopped");
        });
        self.handles.push((name, handle));
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    /// Cancel every job and wait for it to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(job = name, error = %e, "Job ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

/// Write a snapshot of `engine`. Failures are logged and left to the next attempt.
pub async fn save_snapshot(engine: &Engine, store: &SnapshotStore) -> bool {
    let snapshot = engine.snapshot();
    let entries = snapshot.entry_count();
    let ok = match store.save(&snapshot).await {
        Ok(()) => {
            debug!(entries, path = %store.path().display(), "Snapshot saved");
            true
        }
        Err(e) => {
            warn!(error = %e, path = %store.path().display(), "Snapshot failed");
            false
        }
    };
    if let Some(m) = engine.metrics() {
        m.record_snapshot(ok);
    }
    ok
}
