//! # Database Pool Management
//!
//! Connection pool creation and configuration for the durability store.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  Agent startup                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::new(path) ← pool settings                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← pool + migrations                       │
//! │       │                                                                 │
//! │       ├──► db.offline_records()  (ingest writes, sync reads)           │
//! │       └──► db.sync_state()       (last attempt / success)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## SQLite Settings
//! - WAL journal: the sync engine reads while ingest appends
//! - `synchronous = FULL`: a stored record survives power loss, which matters
//!   more here than write throughput
//! - Database file is created if missing

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use eld_core::SyncStatus;

use crate::error::{DbResult, PersistenceError};
use crate::migrations;
use crate::repository::offline::OfflineRecordRepository;
use crate::repository::sync_state::SyncStateRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the store lives and how the pool behaves.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/eld/eld.db")
///     .max_connections(4)
///     .busy_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, created on first open. `:memory:` for tests.
    pub database_path: PathBuf,

    /// One writer (the ingest queue) plus readers. Default: 4
    pub max_connections: u32,

    /// How long a caller waits for a free connection. Default: 30s
    pub acquire_timeout: Duration,

    /// How long SQLite retries a locked database before failing. Default: 5s
    pub busy_timeout: Duration,

    /// Apply embedded migrations on open. Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// In-memory store for tests. Every SQLite memory connection is its own
    /// database, so the pool holds exactly one.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(1),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and runs migrations (if enabled).
    ///
    /// ## Returns
    /// * `Ok(Database)` - Ready-to-use handle
    /// * `Err(PersistenceError::Unavailable)` - File could not be opened
    /// * `Err(PersistenceError::MigrationFailed)` - Schema could not be applied
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        // Keep the single in-memory connection alive for the pool's lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;

        info!(
            path = %config.database_path.display(),
            max_connections = config.max_connections,
            "Durability store opened"
        );

        let db = Database { pool };
        if config.run_migrations {
            db.run_migrations().await?;
        } else {
            debug!("Skipping migrations");
        }
        Ok(db)
    }

    /// Applies pending migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Raw pool access for queries the repositories don't cover.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the offline record repository.
    pub fn offline_records(&self) -> OfflineRecordRepository {
        OfflineRecordRepository::new(self.pool.clone())
    }

    /// Returns the sync state repository.
    pub fn sync_state(&self) -> SyncStateRepository {
        SyncStateRepository::new(self.pool.clone())
    }

    /// Builds the aggregate [`SyncStatus`] projection from current rows.
    ///
    /// `is_syncing` is runtime state owned by the sync engine, so the caller
    /// passes it in.
    pub async fn sync_status(&self, is_syncing: bool) -> DbResult<SyncStatus> {
        let counts = self.offline_records().counts().await?;
        let state = self.sync_state();

        Ok(SyncStatus {
            total_records: counts.total,
            synced_records: counts.synced,
            unsynced_records: counts.unsynced,
            last_sync_attempt: state.last_sync_attempt().await?,
            last_sync_success: state.last_sync_success().await?,
            is_syncing,
        })
    }

    /// Closes the pool. Every later operation fails with `Unavailable`.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Returns true if the database answers a trivial query.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
