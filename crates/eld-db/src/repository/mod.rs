//! # Repository Module
//!
//! SQL lives here and nowhere else.
//!
//! ```text
//! Database
//! ├── offline_records() ──► OfflineRecordRepository
//! │                         store / unsynced_records / mark_synced /
//! │                         record_failure / clear_synced / counts
//! └── sync_state()      ──► SyncStateRepository
//!                           last_sync_attempt / last_sync_success
//! ```

pub mod offline;
pub mod sync_state;
