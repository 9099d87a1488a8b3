//! # Connection Session
//!
//! ## State Machine
//! ```text
//! ┌──────┐ scan() ┌──────────┐
//! │ Idle │──────►│ Scanning │──► Idle (duration elapsed / stop)
//! └──┬───┘        └──────────┘
//!    │ connect()
//!    ▼
//! ┌────────────┐ link up ┌────────────────────────┐ auth-passed ┌────────────────────────┐
//! │ Connecting │───────►│ AwaitingAuthentication │───────────►│ CheckingPasswordPolicy │
//! └────────────┘         └────────────────────────┘             └───────────┬────────────┘
//!                                                          is_set=false     │ is_set=true
//!                                                   ┌───────────────────────┤
//!                                                   │                       ▼
//!                                                   │      ┌──────────────────────────────┐
//!                                                   │      │ AwaitingPasswordVerification │
//!                                                   │      └──────────────┬───────────────┘
//!                                                   ▼        success=true │
//!                                           ┌───────────────┐◄───────────┘
//!                                           │ Authenticated │
//!                                           └───────────────┘
//!
//! Any non-terminal state ──► Failed   (link error, disconnect, bad passcode)
//!                        ──► TimedOut (deadline)
//! ```
//!
//! `Authenticated`, `Failed` and `TimedOut` are terminal for a session; a new
//! `connect()` creates a new session.

use chrono::{DateTime, Utc};

/// Position in the connect / authenticate sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    AwaitingAuthentication,
    CheckingPasswordPolicy,
    AwaitingPasswordVerification,
    Authenticated,
    Failed,
    TimedOut,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Authenticated | ConnectionState::Failed | ConnectionState::TimedOut
        )
    }

    /// True while a connect attempt is in flight.
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::AwaitingAuthentication
                | ConnectionState::CheckingPasswordPolicy
                | ConnectionState::AwaitingPasswordVerification
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingAuthentication => "awaiting_authentication",
            ConnectionState::CheckingPasswordPolicy => "checking_password_policy",
            ConnectionState::AwaitingPasswordVerification => "awaiting_password_verification",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Failed => "failed",
            ConnectionState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// One connect attempt. Owned by the connection manager and dropped when
/// the attempt reaches a terminal state or is cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    pub attempt_id: u64,
    pub device_address: String,
    pub imei: String,
    pub state: ConnectionState,
    /// Set when the authentication wait starts.
    pub auth_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ConnectionSession {
    pub fn new(attempt_id: u64, device_address: &str, imei: &str) -> Self {
        ConnectionSession {
            attempt_id,
            device_address: device_address.to_string(),
            imei: imei.to_string(),
            state: ConnectionState::Connecting,
            auth_deadline: None,
            created_at: Utc::now(),
        }
    }
}
