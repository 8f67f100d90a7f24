//! Error types for the capture store

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the capture store
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Capture record rejected before any write
    #[error("Invalid capture record: {0}")]
    InvalidRecord(String),

    /// Schema bootstrap or upgrade failed; the database keeps its previous state
    #[error("Schema migration from version {from} to {to} failed: {message}")]
    Migration { from: i64, to: i64, message: String },

    /// Database corruption or schema mismatch
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    ConnectionError(#[from] tokio_rusqlite::Error),
}

impl Error {
    /// Create a database error with a message
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create a migration error
    pub fn migration(from: i64, to: i64, msg: impl Into<String>) -> Self {
        Self::Migration { from, to, message: msg.into() }
    }
}

impl From<webclip_core::Error> for Error {
    fn from(err: webclip_core::Error) -> Self {
        match err {
            webclip_core::Error::Record(record) => Self::InvalidRecord(record.to_string()),
            webclip_core::Error::Io(io) => Self::Io(io),
            other => Self::Database(other.to_string()),
        }
    }
}
