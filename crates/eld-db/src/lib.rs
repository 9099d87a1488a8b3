//! # eld-db: Durability Store for ELD Link
//!
//! Every telemetry record lands here before anything touches the network.
//! SQLite via sqlx, WAL mode, embedded migrations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ELD Link Data Flow                             │
//! │                                                                         │
//! │  TelemetryIngestQueue (eld-sync)          SyncEngine (eld-sync)        │
//! │       │ store()                                │ unsynced_records()     │
//! │       ▼                                        ▼ mark_synced()          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     eld-db (THIS CRATE)                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │    Repositories    │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │◄───│ OfflineRecordRepo  │  │ (embedded) │  │   │
//! │  │   │  SqlitePool   │    │ SyncStateRepo      │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ~/.local/share/eld-agent/eld.db (platform data dir)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eld_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("eld.db")).await?;
//! let stored = db.offline_records().store(record).await?;
//! let pending = db.offline_records().unsynced_records().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbResult, PersistenceError, PersistenceErrorKind};
pub use pool::{Database, DbConfig};

pub use repository::offline::{OfflineRecordRepository, RecordCounts};
pub use repository::sync_state::SyncStateRepository;
