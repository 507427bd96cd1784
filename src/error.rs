use std::io;

/// Custom error type for longshot operations
#[derive(Debug, thiserror::Error)]
pub enum LongshotError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Playbook '{playbook}' failed: {message}")]
    ExecutionFailed { playbook: String, message: String },

    #[error("Playbook '{playbook}' timed out after {seconds}s")]
    ExecutionTimedOut { playbook: String, seconds: u64 },

    #[error("Notification delivery failed: {0}")]
    NotificationDelivery(String),

    #[error("Webhook payload rejected: {0}")]
    InvalidPayload(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Helper type for Results that use LongshotError
pub type Result<T> = std::result::Result<T, LongshotError>;
