use std::fs;
use std::path::Path;

use crate::config::{Config, LimitPolicy};
use crate::error::{GavelError, Result};

/// Largest shift that keeps `weight << shift` meaningful in a `u64`.
pub const MAX_SHIFT_LIMIT: u32 = 62;

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| GavelError::Config(format!("Failed to read config file: {e}")))?;
    let cfg = parse(&txt)?;
    Ok(cfg)
}

pub fn parse(txt: &str) -> Result<Config> {
    let cfg: Config =
        toml::from_str(txt).map_err(|e| GavelError::Config(format!("Failed to parse config: {e}")))?;

    validate(&cfg)?;

    Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
    for (name, limit) in &cfg.rate_limit.resources {
        if limit.window_seconds == 0 {
            return Err(GavelError::Config(format!(
                "rate_limit.resources.{name}: window_seconds must be > 0"
            )));
        }
        if limit.policy == LimitPolicy::Quota && limit.max_count == 0 {
            return Err(GavelError::Config(format!(
                "rate_limit.resources.{name}: max_count must be >= 1"
            )));
        }
    }

    let escalation = &cfg.escalation;
    if escalation.buckets.is_empty() {
        return Err(GavelError::Config("escalation.buckets cannot be empty".into()));
    }
    if escalation.buckets.iter().any(|b| b.weight == 0) {
        return Err(GavelError::Config("escalation bucket weights must be > 0".into()));
    }
    if escalation.max_shift > MAX_SHIFT_LIMIT {
        return Err(GavelError::Config(format!(
            "escalation.max_shift must be <= {MAX_SHIFT_LIMIT}"
        )));
    }

    if cfg.vote.threshold == 0 {
        return Err(GavelError::Config("vote.threshold must be >= 1".into()));
    }
    if cfg.vote.timeout_secs == 0 {
        return Err(GavelError::Config("vote.timeout_secs must be > 0".into()));
    }

    if cfg.persistence.snapshot_path.is_some() && cfg.persistence.snapshot_interval_secs == 0 {
        return Err(GavelError::Config("persistence.snapshot_interval_secs must be > 0".into()));
    }

    Ok(())
}
