//! # eld-device: Device Link and Connection State Machine
//!
//! Consumes an abstract vendor [`DeviceLink`] and drives a single ELD
//! connection through discovery, link establishment, authentication and
//! optional passcode verification.
//!
//! ## Module Organization
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        eld-device (THIS CRATE)                          │
//! │                                                                         │
//! │  link.rs       DeviceLink trait, ScanFilter                            │
//! │  events.rs     LinkEvent, EventBus, counted Subscription               │
//! │  session.rs    ConnectionState, ConnectionSession                      │
//! │  attempt.rs    AttemptContext (token + single outcome sink)            │
//! │  manager.rs    ConnectionManager (connect / disconnect / scan)         │
//! │  scan.rs       ScanSession (filtered, de-duplicated)                   │
//! │  telemetry.rs  notify pump: frames ─► TelemetryRecord                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let manager = ConnectionManager::new(link, ConnectConfig::default())
//!     .with_telemetry_sink(ingest.sender());
//!
//! let scan = manager.scan(Duration::from_secs(10), ScanFilter::with_prefixes(["PT30"])).await?;
//! let devices = scan.finish().await;
//!
//! manager.connect(&devices[0].address, imei, Some(passcode)).await?;
//! ```

pub mod attempt;
pub mod error;
pub mod events;
pub mod link;
pub mod manager;
pub mod scan;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod mock;

pub use error::{ConnectError, ConnectResult, LinkError, LinkResult};
pub use events::{EventBus, LinkEvent, Subscription};
pub use link::{DeviceLink, ScanFilter};
pub use manager::{ConnectConfig, ConnectionManager};
pub use scan::{ScanSession, ScanStream};
pub use session::{ConnectionSession, ConnectionState};
