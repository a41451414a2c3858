//! Error types for database operations

use thiserror::Error;

/// Database error types
#[derive(Error, Debug)]
pub enum Error {
    /// SQLx database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Schema creation error
    #[error("Schema error: {0}")]
    Schema(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, Error>;
