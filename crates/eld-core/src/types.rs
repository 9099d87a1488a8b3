//! # Domain Types
//!
//! Core domain types used throughout ELD Link.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ DeviceIdentity  │   │ TelemetryRecord │   │  OfflineRecord  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  address        │   │  id (UUID)      │──►│  id             │       │
//! │  │  display_name   │   │  payload (JSON) │   │  payload        │       │
//! │  │  signal (RSSI)  │   │  captured_at    │   │  synced         │       │
//! │  └─────────────────┘   │  origin         │   │  attempts       │       │
//! │                        └─────────────────┘   └────────┬────────┘       │
//! │                                                       │ projection     │
//! │                                              ┌────────▼────────┐       │
//! │                                              │   SyncStatus    │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `TelemetryRecord` maps to exactly one `OfflineRecord`. `SyncStatus`
//! is a read-only projection and never a source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

// =============================================================================
// Device Identity
// =============================================================================

/// A device discovered during a scan session.
///
/// Keyed by `address`; a scan session never holds two identities with the
/// same address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeviceIdentity {
    /// Radio address (MAC on Android, opaque UUID on iOS).
    pub address: String,

    /// Advertised name, e.g. `PT30-ELD` or `KD032-43149A`.
    pub display_name: Option<String>,

    /// Last observed signal strength (RSSI, dBm).
    pub last_seen_signal: Option<i16>,
}

impl DeviceIdentity {
    /// Creates an identity with only an address.
    pub fn new(address: impl Into<String>) -> Self {
        DeviceIdentity {
            address: address.into(),
            display_name: None,
            last_seen_signal: None,
        }
    }

    /// Merges a newer sighting of the same device into this one.
    ///
    /// Fields missing from the newer sighting keep their previous value.
    pub fn merge(&mut self, newer: DeviceIdentity) {
        if newer.display_name.is_some() {
            self.display_name = newer.display_name;
        }
        if newer.last_seen_signal.is_some() {
            self.last_seen_signal = newer.last_seen_signal;
        }
    }
}

// =============================================================================
// Duty Status
// =============================================================================

/// Hours-of-Service duty status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DutyStatus {
    OffDuty,
    SleeperBerth,
    Driving,
    OnDutyNotDriving,
}

impl DutyStatus {
    /// Wire code used in raw telemetry frames.
    pub const fn code(self) -> u8 {
        match self {
            DutyStatus::OffDuty => 1,
            DutyStatus::SleeperBerth => 2,
            DutyStatus::Driving => 3,
            DutyStatus::OnDutyNotDriving => 4,
        }
    }

    /// Parses a wire code.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DutyStatus::OffDuty),
            2 => Some(DutyStatus::SleeperBerth),
            3 => Some(DutyStatus::Driving),
            4 => Some(DutyStatus::OnDutyNotDriving),
            _ => None,
        }
    }
}

impl std::fmt::Display for DutyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DutyStatus::OffDuty => write!(f, "off_duty"),
            DutyStatus::SleeperBerth => write!(f, "sleeper_berth"),
            DutyStatus::Driving => write!(f, "driving"),
            DutyStatus::OnDutyNotDriving => write!(f, "on_duty_not_driving"),
        }
    }
}

// =============================================================================
// Telemetry
// =============================================================================

/// GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A decoded engine/GPS/odometer sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Vehicle speed in miles per hour.
    pub speed_mph: f64,

    /// Engine speed.
    pub rpm: u16,

    /// Fuel level, percent.
    pub fuel_level_pct: u8,

    /// Odometer in whole miles.
    pub odometer_miles: u32,

    /// Duty status reported by the device.
    pub duty_status: DutyStatus,

    /// GPS fix, when the device reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// The unit of data produced by a connected device.
///
/// Immutable once created. The payload is opaque to the durability and sync
/// layers; only the compliance layer looks inside it (via [`Self::sample`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Locally generated, unique.
    pub id: String,

    /// Structured telemetry.
    pub payload: serde_json::Value,

    /// When the device produced the data.
    pub captured_at: DateTime<Utc>,

    /// Address of the device this record came from.
    pub origin: String,
}

impl TelemetryRecord {
    /// Creates a record with a fresh UUID v4 and `captured_at = now`.
    pub fn new(payload: serde_json::Value, origin: impl Into<String>) -> Self {
        TelemetryRecord {
            id: Uuid::new_v4().to_string(),
            payload,
            captured_at: Utc::now(),
            origin: origin.into(),
        }
    }

    /// Wraps a decoded sample.
    pub fn from_sample(sample: &TelemetrySample, origin: impl Into<String>) -> Self {
        // Plain struct of numbers and enums; serialization cannot fail.
        let payload = serde_json::to_value(sample).unwrap_or(serde_json::Value::Null);
        Self::new(payload, origin)
    }

    /// Returns the decoded sample if the payload holds one.
    pub fn sample(&self) -> Option<TelemetrySample> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

// =============================================================================
// Offline Record
// =============================================================================

/// A telemetry record plus durability metadata.
///
/// ## Lifecycle
/// ```text
/// store()         ──► synced=false, attempts=0
/// record_failure  ──► attempts+1, last_error=Some(..)
/// mark_synced     ──► attempts+1, synced=true, synced_at=now
/// clear_synced    ──► row removed (only when synced=true)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
    pub id: String,
    pub payload: serde_json::Value,
    /// Device that produced the record.
    pub origin: String,
    /// When the device captured the data.
    pub captured_at: DateTime<Utc>,
    /// When the record reached the durability store.
    pub received_at: DateTime<Utc>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    /// Upload attempts so far. Only ever increases.
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl OfflineRecord {
    /// Wraps a freshly arrived telemetry record.
    pub fn from_telemetry(record: TelemetryRecord, received_at: DateTime<Utc>) -> Self {
        OfflineRecord {
            id: record.id,
            payload: record.payload,
            origin: record.origin,
            captured_at: record.captured_at,
            received_at,
            synced: false,
            synced_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Decoded telemetry, if the payload holds a sample.
    pub fn sample(&self) -> Option<TelemetrySample> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Aggregate view over all offline records.
///
/// Recomputed after every mutation; the UI shows `unsynced_records` as the
/// "pending records" indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatus {
    pub total_records: i64,
    pub synced_records: i64,
    pub unsynced_records: i64,
    #[ts(as = "Option<String>")]
    pub last_sync_attempt: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub last_sync_success: Option<DateTime<Utc>>,
    pub is_syncing: bool,
}

// =============================================================================
// Motion Restriction State
// =============================================================================

/// What the driver may do right now, given vehicle motion and co-driver login.
///
/// Transient; recomputed on every telemetry tick and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MotionRestrictionState {
    pub is_vehicle_in_motion: bool,
    #[ts(as = "Option<String>")]
    pub motion_started_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub co_driver_authenticated_at: Option<DateTime<Utc>>,
    /// Snapshot taken at motion onset; fixed until the next onset.
    pub co_driver_logged_in_before_motion: bool,
    pub can_make_entries: bool,
    pub can_switch_roles: bool,
    pub can_edit_records: bool,
}

impl Default for MotionRestrictionState {
    fn default() -> Self {
        MotionRestrictionState {
            is_vehicle_in_motion: false,
            motion_started_at: None,
            co_driver_authenticated_at: None,
            co_driver_logged_in_before_motion: false,
            can_make_entries: true,
            can_switch_roles: true,
            can_edit_records: true,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
