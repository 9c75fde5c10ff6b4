use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Usage(#[from] UsageError),
}

/// Backing store errors.
///
/// These never reach experiment callers: the storage adapter degrades them
/// to "value absent" or "write skipped".
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Remote request errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Invalid request URI: {message}")]
    InvalidUri { message: String },

    #[error("Response channel closed for {callback}")]
    Disconnected { callback: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Input validation errors for `participate` and `convert`.
///
/// The messages are part of the public contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Bad experiment_name")]
    BadExperimentName,

    #[error("Must specify at least 2 alternatives")]
    TooFewAlternatives,

    #[error("Bad alternative name: {name}")]
    BadAlternativeName { name: String },
}

/// Programmer errors, reported synchronously instead of through a callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("Callback is not specified")]
    CallbackNotSpecified,
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
