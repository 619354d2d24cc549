use thiserror::Error;

/// Errors that can occur in the moderation engine
#[derive(Error, Debug)]
pub enum GavelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("User {voter} has already voted in this session")]
    AlreadyVoted { voter: String },

    #[error("Invalid vote candidate: {0}")]
    InvalidCandidate(String),

    #[error("A vote session is already active in group {group}")]
    SessionAlreadyActive { group: String },

    #[error("No active vote session in group {group}")]
    NoActiveSession { group: String },

    #[error("User {user} is not permitted to perform this action")]
    NotPermitted { user: String },

    #[error("Action executor error: {0}")]
    ActionExecutor(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Escalation error: {0}")]
    Escalation(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, GavelError>;
