//! Error types for Teasync
//!
//! All errors in the crate are converted to `AppError`. Variants fall into
//! three classes that decide how the synchronizer treats a failed item:
//!
//! - storage: local persistence failed, surfaced to the caller
//! - network: remote call failed or unreachable, retried with backoff
//! - validation: malformed entity or queue item, never retried

use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// SQLite error (storage)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed (storage)
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Other local persistence failure (storage)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote rejected the request or could not be reached (network)
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client error (network)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Malformed entity or queue item (validation)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload could not be encoded or decoded (validation)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification used by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Storage,
    Network,
    Validation,
    Other,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Database(_) | AppError::Migration(_) | AppError::Storage(_) => {
                ErrorKind::Storage
            }
            AppError::Network(_) | AppError::HttpClient(_) => ErrorKind::Network,
            AppError::Validation(_) | AppError::Serialization(_) => ErrorKind::Validation,
            AppError::Config(_) | AppError::Internal(_) => ErrorKind::Other,
        }
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
