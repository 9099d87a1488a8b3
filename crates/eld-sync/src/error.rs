//! # Sync Error Types
//!
//! Error types for ingest, sync and configuration.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Upload      │  │     Persistence         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  BatchUpload-   │  │  Persistence(..)        │ │
//! │  │  InvalidUrl     │  │    Failed       │  │   (from eld-db)         │ │
//! │  │  ConfigLoad/Save│  │  PartialFailure │  │                         │ │
//! │  │                 │  │  Http           │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed batch is recorded per record and retried on the next run; it
//! only reaches the caller folded into `PartialFailure`.

use thiserror::Error;

use eld_db::PersistenceError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Upload Errors
    // =========================================================================
    /// A single batch was rejected by the primary sink.
    #[error("Batch upload failed: {cause}")]
    BatchUploadFailed { cause: String },

    /// Some batches of a run failed. Their records stay unsynced.
    #[error("{failed_count} record(s) failed to sync")]
    PartialFailure {
        failed_count: usize,
        last_errors: Vec<String>,
    },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// The durability store failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid agent configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid backend URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Http(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if a later sync run may succeed where this one failed.
    ///
    /// ## Retryable Errors
    /// - Upload failures (backend down, network loss)
    /// - Partial failures
    /// - Store temporarily unavailable
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::BatchUploadFailed { .. }
            | SyncError::PartialFailure { .. }
            | SyncError::Http(_) => true,
            SyncError::Persistence(err) => err.is_unavailable(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::BatchUploadFailed {
            cause: "503".into()
        }
        .is_retryable());
        assert!(SyncError::Http("connection reset".into()).is_retryable());
        assert!(SyncError::Persistence(PersistenceError::Unavailable("closed".into())).is_retryable());

        assert!(!SyncError::InvalidConfig("batch_size".into()).is_retryable());
        assert!(!SyncError::Persistence(PersistenceError::Duplicate("x".into())).is_retryable());
    }

    #[test]
    fn test_partial_failure_display() {
        let err = SyncError::PartialFailure {
            failed_count: 50,
            last_errors: vec!["HTTP 500".into()],
        };
        assert_eq!(err.to_string(), "50 record(s) failed to sync");
        assert!(!err.is_config_error());
    }
}
