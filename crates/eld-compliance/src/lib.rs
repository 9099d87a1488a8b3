//! # eld-compliance: Hours-of-Service Rule Layer
//!
//! Two monitors driven by the latest [`VehicleReading`]:
//!
//! ```text
//! ingest taps ──► TelemetrySample ──► watch<VehicleReading>
//!                                            │
//!                      ┌─────────────────────┴─────────────────────┐
//!                      ▼                                           ▼
//!          MotionRestrictionMonitor                      InactivityMonitor
//!          (motion.rs, 1 s poll)                         (inactivity.rs)
//!                      │                                           │
//!                      ▼                                           ▼
//!          watch<MotionRestrictionState>              broadcast<InactivityEvent>
//!                                                                  │
//!                                                     ComplianceApi (api.rs)
//! ```
//!
//! [`derive_permissions`] is the permission table as a pure function; the
//! monitors only decide when to call it.

pub mod api;
pub mod error;
pub mod inactivity;
pub mod motion;
pub mod reading;

pub use api::{ComplianceApi, DutyStatusChange, HttpComplianceApi};
pub use error::{ComplianceError, ComplianceResult};
pub use inactivity::{InactivityConfig, InactivityEvent, InactivityMonitor};
pub use motion::{derive_permissions, MotionRestrictionMonitor, MotionTracker, Permissions};
pub use reading::VehicleReading;
