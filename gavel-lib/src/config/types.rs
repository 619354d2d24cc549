use serde::Deserialize;
use std::path::PathBuf;

use super::moderation::{EscalationConfig, GuardConfig, RateLimitConfig, VoteConfig};

/// Logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Show module path (target) in log messages
    /// Default: false
    #[serde(default)]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct TelemetryConfig {
    /// Port for the observability server (`/metrics`, `/health`)
    /// If not set, no server is started
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Cache configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// How long a memoized nickname stays valid, in seconds
    /// Default: 3600
    #[serde(default = "default_nickname_ttl")]
    pub nickname_ttl_secs: u64,
    /// Interval of the opt-in compaction pass that drops expired entries nobody read
    /// If not set, expired entries are only removed when accessed
    #[serde(default)]
    pub compaction_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { nickname_ttl_secs: default_nickname_ttl(), compaction_interval_secs: None }
    }
}

/// Snapshot persistence configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PersistenceConfig {
    /// Snapshot file. If not set, state lives in memory only
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Seconds between snapshots
    /// Default: 300
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { snapshot_path: None, snapshot_interval_secs: default_snapshot_interval() }
    }
}

/// Main configuration structure
///
/// Every section has defaults, so an empty file is a valid configuration.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub vote: VoteConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nickname_ttl() -> u64 {
    3600
}

fn default_snapshot_interval() -> u64 {
    300
}
