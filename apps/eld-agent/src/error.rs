//! Agent error types.

use thiserror::Error;

use eld_compliance::ComplianceError;
use eld_db::PersistenceError;
use eld_device::{ConnectError, LinkError};
use eld_sync::SyncError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration could not be loaded or the sync stack not built.
    #[error("Sync setup failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Database error: {0}")]
    Database(#[from] PersistenceError),

    #[error("Compliance setup failed: {0}")]
    Compliance(#[from] ComplianceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A scan finished without a matching ELD.
    #[error("No ELD found during scan")]
    NoDeviceFound,

    #[error("Scan failed: {0}")]
    Scan(#[from] LinkError),

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl AgentError {
    /// Whether the connect supervisor should try again after a backoff.
    ///
    /// Passcode and permission failures need the driver; retrying them
    /// would only lock the device.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::NoDeviceFound | AgentError::Scan(_) => true,
            AgentError::Connect(err) => {
                err.is_retryable() || matches!(err, ConnectError::AlreadyConnecting(_))
            }
            _ => false,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
