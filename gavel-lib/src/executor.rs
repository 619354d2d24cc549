//! Side-effecting moderation actions.
//!
//! The engine never talks to a chat protocol directly. It hands decided actions to an
//! [`ActionExecutor`]; a failed call is logged and counted, and never rolls back the
//! in-memory decision that caused it.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Mute `user` in `group` for `duration_secs` seconds.
    async fn mute(&self, group: &str, user: &str, duration_secs: u64) -> Result<()>;

    /// Post `content` to `group`.
    async fn send_message(&self, group: &str, content: &str) -> Result<()>;
}

/// Executor that only records actions in the log.
///
/// Used by the binary when no protocol adapter is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExecutor;

#[async_trait]
impl ActionExecutor for LogExecutor {
    async fn mute(&self, group: &str, user: &str, duration_secs: u64) -> Result<()> {
        info!(group, user, duration_secs, action = "mute", "Moderation action");
        Ok(())
    }

    async fn send_message(&self, group: &str, content: &str) -> Result<()> {
        info!(group, content, action = "send_message", "Moderation action");
        Ok(())
    }
}
