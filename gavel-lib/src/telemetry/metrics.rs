use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

pub mod labels {
    pub const KIND: &str = "kind";
    pub const PREDICATE: &str = "predicate";
    pub const RESOURCE: &str = "resource";
    pub const POLICY: &str = "policy";
    pub const OUTCOME: &str = "outcome";
    pub const STATE: &str = "state";
    pub const ACTION: &str = "action";
    pub const RESULT: &str = "result";
    pub const VERSION: &str = "version";
    pub const RUST_VERSION: &str = "rust_version";
}

pub mod values {
    pub const RESULT_OK: &str = "ok";
    pub const RESULT_ERROR: &str = "error";
}

#[derive(Clone)]
pub struct Metrics {
    pub events_total: Counter<u64>,
    pub guard_rejections_total: Counter<u64>,

    // Rate limiting metrics
    pub rate_limit_allowed_total: Counter<u64>,
    pub rate_limit_rejected_total: Counter<u64>,

    // Escalation metrics
    pub penalty_draws_total: Counter<u64>,
    pub penalties_total: Counter<u64>,
    pub penalty_duration_seconds: Histogram<f64>,

    // Vote metrics
    pub votes_total: Counter<u64>,
    pub vote_sessions_started_total: Counter<u64>,
    pub vote_sessions_closed_total: Counter<u64>,

    pub executor_failures_total: Counter<u64>,
    pub snapshots_total: Counter<u64>,
    pub cache_evictions_total: Counter<u64>,

    // Build info
    pub build_info: Gauge<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            events_total: meter
                .u64_counter("gavel_events_total")
                .with_description("Total number of inbound events by kind")
                .build(),
            guard_rejections_total: meter
                .u64_counter("gavel_guard_rejections_total")
                .with_description("Total number of events dropped by a guard predicate")
                .build(),
            rate_limit_allowed_total: meter
                .u64_counter("gavel_rate_limit_allowed_total")
                .with_description("Total number of calls allowed by rate limiter")
                .build(),
            rate_limit_rejected_total: meter
                .u64_counter("gavel_rate_limit_rejected_total")
                .with_description("Total number of calls rejected by rate limiter")
                .build(),
            penalty_draws_total: meter
                .u64_counter("gavel_penalty_draws_total")
                .with_description("Total number of escalation draws")
                .build(),
            penalties_total: meter
                .u64_counter("gavel_penalties_total")
                .with_description("Total number of non-zero penalties drawn")
                .build(),
            penalty_duration_seconds: meter
                .f64_histogram("gavel_penalty_duration_seconds")
                .with_description("Drawn penalty duration in seconds")
                .build(),
            votes_total: meter
                .u64_counter("gavel_votes_total")
                .with_description("Total number of ballots by outcome (collecting, resolved, duplicate, invalid, rejected)")
                .build(),
            vote_sessions_started_total: meter
                .u64_counter("gavel_vote_sessions_started_total")
                .with_description("Total number of vote sessions started")
                .build(),
            vote_sessions_closed_total: meter
                .u64_counter("gavel_vote_sessions_closed_total")
                .with_description("Total number of vote sessions closed by terminal state")
                .build(),
            executor_failures_total: meter
                .u64_counter("gavel_executor_failures_total")
                .with_description("Total number of failed moderation actions")
                .build(),
            snapshots_total: meter
                .u64_counter("gavel_snapshots_total")
                .with_description("Total number of state snapshots by result")
                .build(),
            cache_evictions_total: meter
                .u64_counter("gavel_cache_evictions_total")
                .with_description("Total number of expired entries dropped by compaction")
                .build(),
            build_info: meter
                .u64_gauge("gavel_build_info")
                .with_description("Build information (version, rust version)")
                .build(),
        }
    }

    /// Set build info metric with version labels
    pub fn set_build_info(&self) {
        let version = env!("CARGO_PKG_VERSION");
        let rust_version = env!("CARGO_PKG_RUST_VERSION");
        self.build_info.record(
            1,
            &[
                KeyValue::new(labels::VERSION, version),
                KeyValue::new(labels::RUST_VERSION, rust_version),
            ],
        );
    }

    pub fn record_event(&self, kind: &str) {
        self.events_total
            .add(1, &[KeyValue::new(labels::KIND, kind.to_string())]);
    }

    pub fn record_guard_rejection(&self, predicate: &str) {
        self.guard_rejections_total
            .add(1, &[KeyValue::new(labels::PREDICATE, predicate.to_string())]);
    }

    pub fn record_rate_limit_allowed(&self, resource: &str, policy: &str) {
        self.rate_limit_allowed_total.add(
            1,
            &[
                KeyValue::new(labels::RESOURCE, resource.to_string()),
                KeyValue::new(labels::POLICY, policy.to_string()),
            ],
        );
    }

    pub fn record_rate_limit_rejection(&self, resource: &str, policy: &str) {
        self.rate_limit_rejected_total.add(
            1,
            &[
                KeyValue::new(labels::RESOURCE, resource.to_string()),
                KeyValue::new(labels::POLICY, policy.to_string()),
            ],
        );
    }

    pub fn record_penalty_draw(&self, duration_secs: u64) {
        self.penalty_draws_total.add(1, &[]);
        if duration_secs > 0 {
            self.penalties_total.add(1, &[]);
            self.penalty_duration_seconds
                .record(duration_secs as f64, &[]);
        }
    }

    pub fn record_vote(&self, outcome: &str) {
        self.votes_total
            .add(1, &[KeyValue::new(labels::OUTCOME, outcome.to_string())]);
    }

    pub fn record_vote_session_started(&self) {
        self.vote_sessions_started_total.add(1, &[]);
    }

    pub fn record_vote_session_closed(&self, state: &str) {
        self.vote_sessions_closed_total
            .add(1, &[KeyValue::new(labels::STATE, state.to_string())]);
    }

    pub fn record_executor_failure(&self, action: &str) {
        self.executor_failures_total
            .add(1, &[KeyValue::new(labels::ACTION, action.to_string())]);
    }

    pub fn record_snapshot(&self, ok: bool) {
        let result = if ok { values::RESULT_OK } else { values::RESULT_ERROR };
        self.snapshots_total
            .add(1, &[KeyValue::new(labels::RESULT, result)]);
    }

    pub fn record_cache_evictions(&self, count: usize) {
        if count > 0 {
            self.cache_evictions_total.add(count as u64, &[]);
        }
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("gavel");
    let metrics = Arc::new(Metrics::new(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}
