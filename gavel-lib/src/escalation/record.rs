use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::EscalationSelector;
use crate::cache::SharedCache;
use crate::clock::{duration_ms, Clock};
use crate::error::Result;

/// Offense history of one user in one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// `"<group>:<user>"`
    pub session_key: String,
    pub offense_count: u32,
    /// When the latest penalty ends (Unix ms)
    pub unban_at_ms: u64,
}

pub fn session_key(group: &str, user: &str) -> String {
    format!("{group}:{user}")
}

/// Offense records keyed by session key, each kept until `offense_memory` after its
/// penalty ends.
pub struct EscalationBook {
    records: SharedCache<EscalationRecord>,
    selector: EscalationSelector,
    rng: Mutex<StdRng>,
    offense_memory: Duration,
    clock: Arc<dyn Clock>,
}

impl EscalationBook {
    pub fn new(selector: EscalationSelector, offense_memory: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(selector, offense_memory, clock, StdRng::from_entropy())
    }

    pub fn with_rng(
        selector: EscalationSelector,
        offense_memory: Duration,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        Self {
            records: SharedCache::new("escalation", clock.clone()),
            selector,
            rng: Mutex::new(rng),
            offense_memory,
            clock,
        }
    }

    /// Draw a penalty for `session_key` and record it if non-zero.
    ///
    /// The offense count is read and updated under the record cache lock, so concurrent
    /// draws for the same key never lose an increment.
    pub fn draw(&self, session_key: &str) -> Result<Duration> {
        self.records.with(|records| {
            let offenses = records
                .get(session_key)
                .map(|r| r.offense_count)
                .unwrap_or(0);

            let duration = {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                self.selector.draw(offenses, &mut *rng)?
            };
            if duration.is_zero() {
                debug!(session_key, offenses, "Escalation draw: no action");
                return Ok(duration);
            }

            let now = self.clock.now_unix_ms();
            let record = EscalationRecord {
                session_key: session_key.to_string(),
                offense_count: offenses.saturating_add(1),
                unban_at_ms: now.saturating_add(duration_ms(duration)),
            };
            debug!(
                session_key,
                offenses = record.offense_count,
                secs = duration.as_secs(),
                "Escalation draw: penalty recorded"
            );
            records.set(session_key, record, Some(duration.saturating_add(self.offense_memory)));
            Ok(duration)
        })
    }

    pub fn record(&self, session_key: &str) -> Option<EscalationRecord> {
        self.records.get(session_key)
    }

    pub fn offense_count(&self, session_key: &str) -> u32 {
        self.record(session_key)
            .map(|r| r.offense_count)
            .unwrap_or(0)
    }

    /// Forget every offense.
    pub fn reset(&self) {
        self.records.clear();
    }

    pub fn compact(&self) -> usize {
        self.records.evict_expired()
    }

    /// Live records for persistence.
    pub fn records(&self) -> Vec<EscalationRecord> {
        let now = self.clock.now_unix_ms();
        self.records.with(|c| {
            c.entries()
                .filter(|(_, _, expires)| expires.is_none_or(|at| at > now))
                .map(|(_, record, _)| record.clone())
                .collect()
        })
    }

    /// Re-insert a persisted record. Returns false if it had already expired.
    pub fn restore(&self, record: EscalationRecord) -> bool {
        let expires_at = record
            .unban_at_ms
            .saturating_add(duration_ms(self.offense_memory));
        let now = self.clock.now_unix_ms();
        if expires_at <= now {
            return false;
        }
        let key = record.session_key.clone();
        self.records
            .set(key, record, Some(Duration::from_millis(expires_at - now)));
        true
    }

    pub fn selector(&self) -> &EscalationSelector {
        &self.selector
    }
}
