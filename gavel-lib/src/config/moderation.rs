use serde::Deserialize;
use std::collections::BTreeMap;

/// Rate limiting configuration
///
/// ```toml
/// [rate_limit]
/// allowlist = ["10001"]
///
/// [rate_limit.resources.message]
/// policy = "quota"
/// window_seconds = 10
/// max_count = 5
///
/// [rate_limit.resources.poke]
/// policy = "cooldown"
/// window_seconds = 30
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Subject ids that bypass every policy
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Limits per logical resource, keyed by resource name
    #[serde(default = "default_resources")]
    pub resources: BTreeMap<String, ResourceLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { allowlist: vec![], resources: default_resources() }
    }
}

/// Limit applied to one resource
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ResourceLimit {
    pub policy: LimitPolicy,
    /// Cooldown length, or quota window, in seconds
    pub window_seconds: u64,
    /// Accepted calls per window (quota only)
    /// Default: 1
    #[serde(default = "default_max_count")]
    pub max_count: u32,
}

/// Rate limiting policy
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    /// One call per subject, then wait `window_seconds`
    Cooldown,
    /// At most `max_count` calls per session within a sliding `window_seconds`
    Quota,
}

impl LimitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitPolicy::Cooldown => "cooldown",
            LimitPolicy::Quota => "quota",
        }
    }
}

/// One duration bucket of the escalation table
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DurationBucket {
    /// Penalty length in minutes; 0 means no action
    pub minutes: u64,
    /// Base draw weight
    pub weight: u64,
}

/// Escalating penalty configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EscalationConfig {
    /// Ordered buckets, shortest first
    /// Default: 0:128, 1:64, 2:32, 5:16, 10:8, 30:4, 60:2
    #[serde(default = "default_buckets")]
    pub buckets: Vec<DurationBucket>,
    /// Shift weight from the shortest bucket to the longest as offenses accumulate
    /// Default: true
    #[serde(default = "default_true")]
    pub increase_probability: bool,
    /// Double every bucket's duration per prior offense
    /// Default: false
    #[serde(default)]
    pub increase_duration: bool,
    /// Upper bound on the per-offense shift
    /// Default: 30
    #[serde(default = "default_max_shift")]
    pub max_shift: u32,
    /// How long an offense is remembered after the penalty ends, in seconds
    /// Default: 86400
    #[serde(default = "default_offense_memory")]
    pub offense_memory_secs: u64,
    /// Interval of the scheduled reset of all offense records, in seconds
    /// Default: 86400
    #[serde(default = "default_reset_interval")]
    pub reset_interval_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            buckets: default_buckets(),
            increase_probability: true,
            increase_duration: false,
            max_shift: default_max_shift(),
            offense_memory_secs: default_offense_memory(),
            reset_interval_secs: default_reset_interval(),
        }
    }
}

/// Vote coordination configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct VoteConfig {
    /// Votes for one target required to resolve a session
    /// Default: 3
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// Wall-clock limit of a session, in seconds
    /// Default: 120
    #[serde(default = "default_vote_timeout")]
    pub timeout_secs: u64,
    /// Non-qualifying events tolerated in a row before the session times out
    /// Default: 20
    #[serde(default = "default_inactivity_budget")]
    pub inactivity_budget: u32,
    /// Target ids sent by legacy clients; discarded, but they count as activity
    /// Default: ["0"]
    #[serde(default = "default_legacy_sentinels")]
    pub legacy_sentinels: Vec<String>,
    /// Penalty applied when a session starts without an explicit duration
    /// Default: 600
    #[serde(default = "default_vote_duration")]
    pub default_duration_secs: u64,
    /// Users who can never be vote targets
    #[serde(default)]
    pub protected_users: Vec<String>,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            timeout_secs: default_vote_timeout(),
            inactivity_budget: default_inactivity_budget(),
            legacy_sentinels: default_legacy_sentinels(),
            default_duration_secs: default_vote_duration(),
            protected_users: vec![],
        }
    }
}

/// Pre-dispatch guard configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct GuardConfig {
    /// Groups the bot serves. Empty means every group
    #[serde(default)]
    pub enabled_groups: Vec<String>,
    /// Users whose events are dropped
    #[serde(default)]
    pub ignored_users: Vec<String>,
    /// The bot's own user id; its events are dropped
    #[serde(default)]
    pub bot_id: Option<String>,
}

fn default_resources() -> BTreeMap<String, ResourceLimit> {
    BTreeMap::from([
        (
            "message".to_string(),
            ResourceLimit { policy: LimitPolicy::Quota, window_seconds: 10, max_count: 5 },
        ),
        (
            "poke".to_string(),
            ResourceLimit { policy: LimitPolicy::Cooldown, window_seconds: 30, max_count: 1 },
        ),
        (
            "vote_start".to_string(),
            ResourceLimit { policy: LimitPolicy::Cooldown, window_seconds: 300, max_count: 1 },
        ),
    ])
}

pub fn default_buckets() -> Vec<DurationBucket> {
    [(0, 128), (1, 64), (2, 32), (5, 16), (10, 8), (30, 4), (60, 2)]
        .into_iter()
        .map(|(minutes, weight)| DurationBucket { minutes, weight })
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_max_count() -> u32 {
    1
}

fn default_max_shift() -> u32 {
    30
}

fn default_offense_memory() -> u64 {
    86400
}

fn default_reset_interval() -> u64 {
    86400
}

fn default_threshold() -> usize {
    3
}

fn default_vote_timeout() -> u64 {
    120
}

fn default_inactivity_budget() -> u32 {
    20
}

fn default_legacy_sentinels() -> Vec<String> {
    vec!["0".to_string()]
}

fn default_vote_duration() -> u64 {
    600
}
