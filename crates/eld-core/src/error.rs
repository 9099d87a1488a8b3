//! # Error Types
//!
//! Domain-specific error types for eld-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  eld-core errors (this file)                                           │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── PacketError      - Raw telemetry frame decoding failures          │
//! │                                                                         │
//! │  eld-db          └── PersistenceError                                  │
//! │  eld-device      └── ConnectError / LinkError                          │
//! │  eld-sync        └── SyncError                                         │
//! │  eld-compliance  └── ComplianceError                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Packet Error
// =============================================================================

/// Raw telemetry frame could not be decoded.
///
/// These never abort the ingest pipeline: undecodable frames are kept as
/// opaque payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Frame is shorter than the fixed frame length.
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Start flag, packet type or end flag is wrong.
    #[error("Bad frame delimiters: {0}")]
    BadFrame(String),

    /// Checksum byte does not match the frame contents.
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// Duty status byte is not a known code.
    #[error("Unknown duty status code: {0}")]
    UnknownDutyStatus(u8),
}

// =============================================================================
// Core Error
// =============================================================================

/// General domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Telemetry frame decoding failed.
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// Payload does not have the expected structure.
    #[error("Invalid telemetry payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidPayload(err.to_string())
    }
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PacketError::ChecksumMismatch {
            expected: 0x12,
            actual: 0x34,
        };
        assert_eq!(err.to_string(), "Checksum mismatch: expected 0x12, got 0x34");

        let err = PacketError::TooShort {
            expected: 14,
            actual: 3,
        };
        assert!(err.to_string().contains("14"));
    }

    #[test]
    fn test_packet_error_converts_to_core_error() {
        let core: CoreError = PacketError::UnknownDutyStatus(9).into();
        assert!(matches!(core, CoreError::Packet(PacketError::UnknownDutyStatus(9))));
    }
}
