//! Error types for chatwarden.
//!
//! Everything below the connection supervisor is recovered locally; the only
//! error that is allowed to stop the process is a terminal (logged-out)
//! transport closure, surfaced as [`TransportError::LoggedOut`].

/// Top-level error type for the bot runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential persistence errors.
///
/// `NotFound` is the expected first-run state and never fatal; IO errors on
/// write are fatal because a half-persisted rotation would be worse than a
/// crash.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No stored credentials")]
    NotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential record is not well-formed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transport-boundary errors.
///
/// Closure classification (terminal vs transient) lives on
/// [`crate::transport::CloseReason`]; these variants cover the operations the
/// engine performs against the transport seam.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Session logged out; a fresh device link is required")]
    LoggedOut,

    #[error("Failed to open transport session: {0}")]
    ConnectFailed(String),

    #[error("Failed to send to {chat_id}: {reason}")]
    SendFailed { chat_id: String, reason: String },

    #[error("Metadata fetch failed for {chat_id}: {reason}")]
    FetchFailed { chat_id: String, reason: String },
}

/// Command-handler errors, caught at the dispatch boundary.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Handler for '{command}' failed: {reason}")]
    HandlerFailed { command: String, reason: String },
}

/// Result type alias for the bot runtime.
pub type Result<T> = std::result::Result<T, Error>;
