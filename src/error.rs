//! Error types for feedkeeper.

use thiserror::Error;

/// Common error type for feedkeeper.
#[derive(Error, Debug)]
pub enum FeedkeeperError {
    /// Database error.
    ///
    /// Errors from sqlx and the migrator are converted into this variant.
    /// The poll engine treats it as fatal for the whole batch.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Feed fetch setup error (HTTP client construction, rejected URL).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// One or more fetched entries could not be matched against stored
    /// entries and the unmatchable policy is `raise`.
    #[error("{0}")]
    Reconcile(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for FeedkeeperError {
    fn from(e: sqlx::Error) -> Self {
        FeedkeeperError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for FeedkeeperError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        FeedkeeperError::Database(format!("migration failed: {e}"))
    }
}

/// Result type alias for feedkeeper operations.
pub type Result<T> = std::result::Result<T, FeedkeeperError>;
