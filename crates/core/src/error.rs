use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for webclip-core
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types shared by the capture engine and its shells
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error for file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Parse/serialization errors
    #[error("parse error: {0}")]
    Parse(String),

    /// Capture record validation errors
    #[error("invalid capture record: {0}")]
    Record(#[from] RecordError),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Reasons a capture record is rejected before it reaches the store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The caller did not supply a capture id
    #[error("capture id is empty")]
    MissingId,

    /// The source URL is missing
    #[error("source url is empty for capture '{capture_id}'")]
    MissingUrl { capture_id: String },

    /// The capture type is missing
    #[error("capture type is empty for capture '{capture_id}'")]
    MissingCaptureType { capture_id: String },

    /// The record file could not be read as a capture record
    #[error("record at {path} is not a capture record: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

impl RecordError {
    /// Create a missing url error
    pub fn missing_url(capture_id: impl Into<String>) -> Self {
        Self::MissingUrl { capture_id: capture_id.into() }
    }

    /// Create a missing capture type error
    pub fn missing_capture_type(capture_id: impl Into<String>) -> Self {
        Self::MissingCaptureType { capture_id: capture_id.into() }
    }
}
