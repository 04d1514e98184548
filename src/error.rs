//! Error types for nova-vault

use thiserror::Error;
use uuid::Uuid;

/// Main error type for backup and restore operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Walkdir error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("Job not found: {id}")]
    JobNotFound { id: Uuid },

    #[error("Invalid archive: {reason}")]
    InvalidArchive { reason: String },

    #[error("Unsupported archive format version: {version}")]
    UnsupportedFormat { version: String },

    #[error("Integrity verification failed: {reason}")]
    IntegrityError { reason: String },

    #[error("Data source error: {reason}")]
    DataSource { reason: String },

    #[error("Storage error: {reason}")]
    Storage { reason: String },

    #[error("Invalid storage path: {path}")]
    InvalidPath { path: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Scheduling error: {reason}")]
    Scheduling { reason: String },
}

impl Error {
    /// Whether re-running the whole job could succeed.
    ///
    /// Structural problems (bad archive, bad configuration, a job that does not
    /// exist) fail the same way every time and are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::Zip(_)
            | Error::Walkdir(_)
            | Error::DataSource { .. }
            | Error::Storage { .. }
            | Error::Scheduling { .. } => true,
            Error::Serialization(_)
            | Error::Yaml(_)
            | Error::JobNotFound { .. }
            | Error::InvalidArchive { .. }
            | Error::UnsupportedFormat { .. }
            | Error::IntegrityError { .. }
            | Error::InvalidPath { .. }
            | Error::Configuration { .. } => false,
        }
    }
}

/// Result type alias for nova-vault operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk"));
        assert!(io.is_retryable());
        assert!(Error::DataSource { reason: "timeout".into() }.is_retryable());

        assert!(!Error::InvalidArchive { reason: "no backup.json".into() }.is_retryable());
        assert!(!Error::UnsupportedFormat { version: "9.9".into() }.is_retryable());
        assert!(!Error::JobNotFound { id: Uuid::nil() }.is_retryable());
    }
}
