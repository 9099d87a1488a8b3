//! # eld-core: Pure Domain Types for ELD Link
//!
//! Every other crate in the workspace speaks in these types. Nothing in here
//! touches a database, a radio or a socket.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ELD Link Data Flow                             │
//! │                                                                         │
//! │  Device Link ─► ConnectionManager ─► IngestQueue ─► Store ─► SyncEngine │
//! │   (vendor)       (eld-device)        (eld-sync)   (eld-db)  (eld-sync)  │
//! │                         │                                               │
//! │                         └──► Compliance monitors (eld-compliance)       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ eld-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────────┐  ┌────────────────┐  ┌─────────────────┐  │   │
//! │  │   │     types      │  │     packet     │  │      error      │  │   │
//! │  │   │ TelemetryRecord│  │  14-byte frame │  │   PacketError   │  │   │
//! │  │   │ OfflineRecord  │  │  encode/decode │  │   CoreError     │  │   │
//! │  │   │ SyncStatus     │  │                │  │                 │  │   │
//! │  │   └────────────────┘  └────────────────┘  └─────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (records, identities, status projections)
//! - [`packet`] - Raw telemetry frame codec
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use eld_core::packet;
//! use eld_core::types::{DutyStatus, TelemetrySample};
//!
//! let sample = TelemetrySample {
//!     speed_mph: 45.5,
//!     rpm: 1500,
//!     fuel_level_pct: 72,
//!     odometer_miles: 125_000,
//!     duty_status: DutyStatus::Driving,
//!     location: None,
//! };
//!
//! let frame = packet::encode(&sample);
//! let decoded = packet::decode(&frame).unwrap();
//! assert_eq!(decoded.odometer_miles, 125_000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod packet;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, PacketError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Speed at or above which the vehicle counts as moving.
pub const DEFAULT_MOTION_THRESHOLD_MPH: f64 = 5.0;

/// Number of offline records uploaded per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Deadline for the whole connect-through-authenticate sequence.
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 30;
