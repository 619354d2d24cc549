//! Inbound event model.
//!
//! Events arrive as JSON objects, one per line on the binary's input stream:
//!
//! ```json
//! {"group_id":"g1","user_id":"u7","timestamp":1700000000,"payload":{"type":"vote","target":"u9"}}
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub group_id: String,
    pub user_id: String,
    /// Unix seconds as reported by the protocol adapter. Informational only; the engine
    /// clock decides every expiry.
    #[serde(default)]
    pub timestamp: u64,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Message {
        text: String,
        #[serde(default)]
        nickname: Option<String>,
    },
    Poke {
        target: String,
    },
    Notice {
        kind: String,
    },
    VoteStart {
        #[serde(default)]
        duration_secs: Option<u64>,
        reason: String,
        #[serde(default)]
        threshold: Option<usize>,
    },
    Vote {
        target: String,
    },
    VoteCancel,
    Offense {
        reason: String,
    },
}

impl Payload {
    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Message { .. } => "message",
            Payload::Poke { .. } => "poke",
            Payload::Notice { .. } => "notice",
            Payload::VoteStart { .. } => "vote_start",
            Payload::Vote { .. } => "vote",
            Payload::VoteCancel => "vote_cancel",
            Payload::Offense { .. } => "offense",
        }
    }
}

impl InboundEvent {
    pub fn new(group_id: impl Into<String>, user_id: impl Into<String>, payload: Payload) -> Self {
        Self { group_id: group_id.into(), user_id: user_id.into(), timestamp: 0, payload }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}
