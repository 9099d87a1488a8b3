//! # Persistence Error Types
//!
//! Error types for durability store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PersistenceError (this module) ← read/write context + classification  │
//! │       │                                                                 │
//! │       ├──► Ingest: logs and drops, never blocks the device pipeline    │
//! │       └──► SyncEngine: aborts the run, records stay unsynced           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceErrorKind {
    /// The store is reachable but refused or failed this write.
    WriteFailed,
    /// The store cannot be reached at all (closed pool, I/O, locked file).
    Unavailable,
}

/// Durability store errors.
///
/// Every storage operation returns one of these explicitly; there is no
/// silent no-op fallback.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A write was rejected or failed.
    ///
    /// ## When This Occurs
    /// - Constraint or trigger violation (e.g. deleting an unsynced row)
    /// - Disk full
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The store cannot be reached.
    ///
    /// ## When This Occurs
    /// - Pool closed or exhausted
    /// - Database file unreadable / permissions
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A read failed for a reason other than unavailability.
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// A record with this id already exists. Records are never overwritten.
    #[error("Duplicate record id: {0}")]
    Duplicate(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Stored payload could not be decoded.
    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl PersistenceError {
    /// Returns the coarse classification of this error.
    pub fn kind(&self) -> PersistenceErrorKind {
        match self {
            PersistenceError::WriteFailed(_) | PersistenceError::Duplicate(_) => {
                PersistenceErrorKind::WriteFailed
            }
            PersistenceError::Unavailable(_)
            | PersistenceError::ReadFailed(_)
            | PersistenceError::MigrationFailed(_)
            | PersistenceError::Corrupt { .. } => PersistenceErrorKind::Unavailable,
        }
    }

    /// Returns true if the store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PersistenceError::Unavailable(_))
    }

    /// Classifies an sqlx error raised by a write.
    pub(crate) fn on_write(err: sqlx::Error) -> Self {
        match classify(err) {
            Classified::Unavailable(msg) => PersistenceError::Unavailable(msg),
            Classified::Unique(msg) => PersistenceError::Duplicate(msg),
            Classified::Other(msg) => PersistenceError::WriteFailed(msg),
        }
    }

    /// Classifies an sqlx error raised by a read.
    pub(crate) fn on_read(err: sqlx::Error) -> Self {
        match classify(err) {
            Classified::Unavailable(msg) => PersistenceError::Unavailable(msg),
            Classified::Unique(msg) | Classified::Other(msg) => PersistenceError::ReadFailed(msg),
        }
    }
}

enum Classified {
    Unavailable(String),
    Unique(String),
    Other(String),
}

/// Maps sqlx errors onto availability classes.
///
/// ```text
/// sqlx::Error::PoolTimedOut / PoolClosed / Io  → Unavailable
/// sqlx::Error::Database "database is locked"   → Unavailable
/// sqlx::Error::Database "UNIQUE constraint"    → Unique
/// Other                                        → Other
/// ```
fn classify(err: sqlx::Error) -> Classified {
    match err {
        sqlx::Error::PoolTimedOut => Classified::Unavailable("connection pool timed out".into()),
        sqlx::Error::PoolClosed => Classified::Unavailable("connection pool is closed".into()),
        sqlx::Error::Io(io) => Classified::Unavailable(io.to_string()),
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_string();
            if msg.contains("UNIQUE constraint failed") {
                Classified::Unique(msg)
            } else if msg.contains("database is locked") || msg.contains("unable to open") {
                Classified::Unavailable(msg)
            } else {
                Classified::Other(msg)
            }
        }
        other => Classified::Other(other.to_string()),
    }
}

impl From<sqlx::migrate::MigrateError> for PersistenceError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PersistenceError::MigrationFailed(err.to_string())
    }
}

/// Result type for durability store operations.
pub type DbResult<T> = Result<T, PersistenceError>;
