//! # Compliance Error Types

use thiserror::Error;

/// Result type alias for compliance operations.
pub type ComplianceResult<T> = Result<T, ComplianceError>;

#[derive(Debug, Error)]
pub enum ComplianceError {
    /// The compliance backend rejected the request.
    #[error("Compliance API rejected request: HTTP {status}: {message}")]
    ApiFailed { status: u16, message: String },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid monitor or client configuration.
    #[error("Invalid compliance configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for ComplianceError {
    fn from(err: reqwest::Error) -> Self {
        ComplianceError::Http(err.to_string())
    }
}

impl From<url::ParseError> for ComplianceError {
    fn from(err: url::ParseError) -> Self {
        ComplianceError::InvalidConfig(err.to_string())
    }
}

impl ComplianceError {
    /// Server-side and transport failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ComplianceError::ApiFailed { status, .. } => *status >= 500,
            ComplianceError::Http(_) => true,
            ComplianceError::InvalidConfig(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(ComplianceError::Http("reset".into()).is_retryable());
        assert!(ComplianceError::ApiFailed {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ComplianceError::ApiFailed {
            status: 422,
            message: "bad status".into()
        }
        .is_retryable());
        assert!(!ComplianceError::InvalidConfig("url".into()).is_retryable());
    }
}
