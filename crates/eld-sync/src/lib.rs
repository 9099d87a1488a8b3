//! # eld-sync: Ingest Queue and Sync Engine for ELD Link
//!
//! Gets telemetry into the durability store and from there to the backend.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ELD Link Sync                                  │
//! │                                                                         │
//! │  ConnectionManager ──► TelemetryIngestQueue ──► eld-db                 │
//! │   (notify pump)          (ingest.rs)             offline_records        │
//! │                               │ taps                   │                │
//! │                               ▼                        ▼                │
//! │                        compliance monitors      SyncEngine (engine.rs)  │
//! │                                                        │                │
//! │                                          ┌─────────────┴──────────┐     │
//! │                                          ▼                        ▼     │
//! │                                  primary BatchSink        mirror sinks  │
//! │                                  (HttpBatchSink)          (best effort) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let config = AgentConfig::load(None)?;
//! let sink = Arc::new(HttpBatchSink::new(url, config.request_timeout())?);
//! let engine = SyncEngine::new(db.clone(), sink, config.sync.batch_size);
//! let ingest = TelemetryIngestQueue::spawn(db, Some(engine.clone()));
//!
//! let report = engine.sync_pending().await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod sink;

pub use config::{AgentConfig, ComplianceSettings, DeviceSettings, StorageSettings, SyncSettings};
pub use engine::{SyncEngine, SyncReport};
pub use error::{SyncError, SyncResult};
pub use ingest::{IngestStats, TelemetryIngestQueue};
pub use sink::{BatchSink, HttpBatchSink};
