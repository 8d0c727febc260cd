//! Error types for the OTA agent.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OtaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Insufficient disk space: required {required_mb:.2}MB, available {available_mb:.2}MB")]
    InsufficientSpace { required_mb: f64, available_mb: f64 },

    #[error("Partial failure after {applied} of {total} files: {reason}")]
    PartialFailure {
        applied: usize,
        total: usize,
        reason: String,
    },

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("No backup available")]
    NoBackup,

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

impl OtaError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OtaError::Network(_) | OtaError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, OtaError>;
