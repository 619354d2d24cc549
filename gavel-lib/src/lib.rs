#![forbid(unsafe_code)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod events;
pub mod executor;
pub mod guard;
pub mod persistence;
pub mod rate_limit;
pub mod router;
pub mod scheduler;
pub mod telemetry;
pub mod vote;

pub use cache::{ExpiringCache, SharedCache, TtlStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_from_path, Config};
pub use engine::Engine;
pub use error::{GavelError, Result};
pub use events::{InboundEvent, Payload};
pub use executor::{ActionExecutor, LogExecutor};
pub use persistence::{Snapshot, SnapshotStore};
pub use rate_limit::RateLimitResult;
pub use router::{RouteOutcome, Router};
pub use scheduler::Scheduler;
pub use vote::SessionState;
