//! # Device Error Types
//!
//! ```text
//! vendor call fails ──► LinkError ──┐
//!                                   ├──► ConnectError ──► caller of connect()
//! link event / deadline ────────────┘
//! ```
//!
//! Connection failures are returned to the caller of `connect()` as-is. The
//! state machine never retries on its own.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Link Error
// =============================================================================

/// A raw vendor-link call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Platform refused radio access (permissions are a platform precondition).
    #[error("Radio permission denied: {0}")]
    PermissionDenied(String),

    /// The device could not be reached.
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// Operation requires an established link.
    #[error("Not connected")]
    NotConnected,

    /// Any other vendor command failure.
    #[error("{command} failed: {reason}")]
    CommandFailed {
        command: &'static str,
        reason: String,
    },
}

pub type LinkResult<T> = Result<T, LinkError>;

// =============================================================================
// Connect Error
// =============================================================================

/// Terminal failure of a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Platform refused radio access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Link establishment failed.
    #[error("Device {address} unreachable: {reason}")]
    DeviceUnreachable { address: String, reason: String },

    /// The device or a vendor call broke the authentication sequence.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Device rejected the passcode. The link has been torn down.
    #[error("Incorrect passcode")]
    PasscodeIncorrect,

    /// Device has a password policy but no passcode was supplied.
    #[error("Device requires a passcode")]
    PasscodeRequired,

    /// No terminal signal before the authentication deadline.
    #[error("Connection timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    /// Link dropped before authentication completed.
    #[error("Device disconnected during connect")]
    Disconnected,

    /// Attempt was superseded by another connect or an explicit disconnect.
    #[error("Connect attempt cancelled")]
    Cancelled,

    /// An attempt for this device is already in flight.
    #[error("Already connecting to {0}")]
    AlreadyConnecting(String),
}

impl ConnectError {
    /// Maps a failed `DeviceLink::connect` call.
    pub fn from_link(address: &str, err: LinkError) -> Self {
        match err {
            LinkError::PermissionDenied(reason) => ConnectError::PermissionDenied(reason),
            other => ConnectError::DeviceUnreachable {
                address: address.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Only passcode and timeout failures are shown to the driver directly.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            ConnectError::PasscodeIncorrect | ConnectError::Timeout { .. }
        )
    }

    /// Short driver-facing message, for user-visible errors only.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            ConnectError::PasscodeIncorrect => Some("Incorrect passcode"),
            ConnectError::Timeout { .. } => Some("Connection timed out"),
            _ => None,
        }
    }

    /// Whether a caller-side retry could succeed without user input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectError::DeviceUnreachable { .. }
                | ConnectError::Timeout { .. }
                | ConnectError::Disconnected
                | ConnectError::AuthenticationFailed(_)
        )
    }

    /// Whether the link may be left half-open and must be torn down.
    pub(crate) fn requires_teardown(&self) -> bool {
        matches!(
            self,
            ConnectError::PasscodeIncorrect
                | ConnectError::PasscodeRequired
                | ConnectError::Timeout { .. }
                | ConnectError::AuthenticationFailed(_)
        )
    }
}

pub type ConnectResult<T> = Result<T, ConnectError>;
