//! Weighted-random penalty duration picker.
//!
//! The table is an ordered list of `(minutes, weight)` buckets. For an offender with `n`
//! prior offenses and an effective shift `s = min(n, max_shift)`:
//!
//! - with `increase_probability`, the first bucket's weight becomes `w / 2^s` and the last
//!   bucket's weight becomes `w * 2^s` (saturating);
//! - with `increase_duration`, every bucket's minutes become `m * 2^s` (saturating).
//!
//! A bucket is drawn proportionally to its effective weight and its minutes are converted
//! to seconds. A zero-minute bucket means no action.
//!
//! A single-bucket table is always drawn, so `increase_probability` leaves it unchanged.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::time::Duration;

use crate::config::{DurationBucket, EscalationConfig, MAX_SHIFT_LIMIT};
use crate::error::{GavelError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationSelector {
    buckets: Vec<DurationBucket>,
    increase_probability: bool,
    increase_duration: bool,
    max_shift: u32,
}

impl EscalationSelector {
    pub fn new(config: &EscalationConfig) -> Result<Self> {
        Self::with_buckets(
            config.buckets.clone(),
            config.increase_probability,
            config.increase_duration,
            config.max_shift,
        )
    }

    pub fn with_buckets(
        buckets: Vec<DurationBucket>,
        increase_probability: bool,
        increase_duration: bool,
        max_shift: u32,
    ) -> Result<Self> {
        if buckets.is_empty() {
            return Err(GavelError::Escalation("duration table is empty".into()));
        }
        if buckets.iter().all(|b| b.weight == 0) {
            return Err(GavelError::Escalation("all bucket weights are zero".into()));
        }
        if max_shift > MAX_SHIFT_LIMIT {
            return Err(GavelError::Escalation(format!(
                "max_shift {max_shift} exceeds {MAX_SHIFT_LIMIT}"
            )));
        }
        Ok(Self { buckets, increase_probability, increase_duration, max_shift })
    }

    /// Shift applied for `offenses` prior offenses.
    pub fn shift(&self, offenses: u32) -> u32 {
        offenses.min(self.max_shift)
    }

    /// The table after applying both escalation flags for `offenses` prior offenses.
    pub fn effective_buckets(&self, offenses: u32) -> Vec<DurationBucket> {
        let shift = self.shift(offenses);
        let factor = 1u64 << shift;
        let mut buckets = self.buckets.clone();

        // With one bucket the first and last coincide and the draw is certain anyway.
        if self.increase_probability && buckets.len() > 1 {
            let last = buckets.len() - 1;
            buckets[0].weight >>= shift;
            buckets[last].weight = buckets[last].weight.saturating_mul(factor);
        }
        if self.increase_duration {
            for bucket in &mut buckets {
                bucket.minutes = bucket.minutes.saturating_mul(factor);
            }
        }

        // The weights' sum must fit in a u64 for the draw.
        let cap = u64::MAX / buckets.len() as u64;
        for bucket in &mut buckets {
            bucket.weight = bucket.weight.min(cap);
        }
        buckets
    }

    /// Probability that a draw for `offenses` prior offenses results in no action.
    pub fn no_action_probability(&self, offenses: u32) -> f64 {
        let buckets = self.effective_buckets(offenses);
        let total: f64 = buckets.iter().map(|b| b.weight as f64).sum();
        if total == 0.0 {
            return 0.0;
        }
        let zero: f64 = buckets
            .iter()
            .filter(|b| b.minutes == 0)
            .map(|b| b.weight as f64)
            .sum();
        zero / total
    }

    /// Draw a penalty for an offender with `offenses` prior offenses.
    pub fn draw<R: Rng + ?Sized>(&self, offenses: u32, rng: &mut R) -> Result<Duration> {
        let buckets = self.effective_buckets(offenses);
        let index = WeightedIndex::new(buckets.iter().map(|b| b.weight))
            .map_err(|e| GavelError::Escalation(format!("invalid weights: {e}")))?;
        let minutes = buckets[index.sample(rng)].minutes;
        Ok(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn buckets(&self) -> &[DurationBucket] {
        &self.buckets
    }
}
