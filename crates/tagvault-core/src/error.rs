//! Error types for the tagvault persistence stack.
//!
//! The variants follow the failure taxonomy of the store: missing and
//! malformed records are "absent" at the read boundary but stay
//! distinguishable here so they can be logged differently, while write and
//! database failures carry enough context for the orchestrator to report them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tagvault.
#[derive(Debug, Error)]
pub enum VaultError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Could not find a free name for {path:?} after {attempts} attempts")]
    CollisionLimit { path: PathBuf, attempts: u32 },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Malformed record at {path:?}: {message}")]
    Malformed { path: PathBuf, message: String },

    // Record errors
    #[error("Record not found: {hash}")]
    RecordNotFound { hash: String },

    #[error("Invalid media hash {hash:?}: {reason}")]
    InvalidHash { hash: String, reason: String },

    // Media decoding errors
    #[error("Image error: {message}")]
    Image { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for tagvault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        VaultError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<image::ImageError> for VaultError {
    fn from(err: image::ImageError) -> Self {
        VaultError::Image {
            message: err.to_string(),
        }
    }
}

impl VaultError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        VaultError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// True for "no record yet", which callers treat as an empty state.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::RecordNotFound { .. })
    }

    /// True when a record file exists but could not be parsed.
    pub fn is_malformed(&self) -> bool {
        matches!(self, VaultError::Malformed { .. })
    }
}
