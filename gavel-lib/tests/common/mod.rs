//! Shared test helpers
#![allow(dead_code)]

use async_trait::async_trait;
use gavel_lib::clock::ManualClock;
use gavel_lib::config::Config;
use gavel_lib::{ActionExecutor, Engine, GavelError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Fixed start instant for manual clocks (2023-11-14T22:13:20Z)
pub const T0: u64 = 1_700_000_000_000;

/// Executor that records every call and can be told to fail mutes.
#[derive(Default)]
pub struct RecordingExecutor {
    mutes: Mutex<Vec<(String, String, u64)>>,
    messages: Mutex<Vec<(String, String)>>,
    fail_mutes: AtomicBool,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let executor = Self::default();
        executor.fail_mutes.store(true, Ordering::SeqCst);
        Arc::new(executor)
    }

    pub fn mutes(&self) -> Vec<(String, String, u64)> {
        self.mutes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn mute_count(&self) -> usize {
        self.mutes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn mute(&self, group: &str, user: &str, duration_secs: u64) -> gavel_lib::Result<()> {
        // Recorded even on failure: the call was attempted.
        self.mutes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((group.to_string(), user.to_string(), duration_secs));
        if self.fail_mutes.load(Ordering::SeqCst) {
            return Err(GavelError::ActionExecutor("permission denied".to_string()));
        }
        Ok(())
    }

    async fn send_message(&self, group: &str, content: &str) -> gavel_lib::Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((group.to_string(), content.to_string()));
        Ok(())
    }
}

/// Engine on a manual clock with a recording executor and a seeded RNG.
pub fn engine_with(config: Config) -> (Arc<Engine>, Arc<ManualClock>, Arc<RecordingExecutor>) {
    let clock = Arc::new(ManualClock::new(T0));
    let executor = RecordingExecutor::new();
    let engine = Engine::with_rng_seed(config, clock.clone(), executor.clone(), 7)
        .unwrap_or_else(|e| panic!("engine construction failed: {e}"));
    (Arc::new(engine), clock, executor)
}

pub fn engine() -> (Arc<Engine>, Arc<ManualClock>, Arc<RecordingExecutor>) {
    engine_with(Config::default())
}
