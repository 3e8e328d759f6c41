//! Error types for the activation host.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Heartbeat error: {0}")]
    Heartbeat(#[from] HeartbeatError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by a background task's heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    #[error("Heartbeat for {key} failed: {reason}")]
    Failed { key: String, reason: String },
}

/// Errors raised when talking to an activation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivationError {
    #[error("Activation {key} has terminated")]
    Terminated { key: String },
}

/// Errors raised by an activation directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),
}

/// Result type alias for the activation host.
pub type Result<T> = std::result::Result<T, Error>;
