//! # Sync State Repository
//!
//! Key-value bookkeeping for the sync engine. Survives restarts so the
//! status projection can show the last attempt and success after reboot.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbResult, PersistenceError};

const LAST_SYNC_ATTEMPT: &str = "last_sync_attempt";
const LAST_SYNC_SUCCESS: &str = "last_sync_success";

/// Repository for the `sync_state` table.
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    /// Creates a new SyncStateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncStateRepository { pool }
    }

    pub async fn last_sync_attempt(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.get_timestamp(LAST_SYNC_ATTEMPT).await
    }

    pub async fn set_last_sync_attempt(&self, at: DateTime<Utc>) -> DbResult<()> {
        self.set_timestamp(LAST_SYNC_ATTEMPT, at).await
    }

    pub async fn last_sync_success(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.get_timestamp(LAST_SYNC_SUCCESS).await
    }

    pub async fn set_last_sync_success(&self, at: DateTime<Utc>) -> DbResult<()> {
        self.set_timestamp(LAST_SYNC_SUCCESS, at).await
    }

    async fn get_timestamp(&self, key: &str) -> DbResult<Option<DateTime<Utc>>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(PersistenceError::on_read)?;

        value
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| PersistenceError::Corrupt {
                        id: key.to_string(),
                        reason: e.to_string(),
                    })
            })
            .transpose()
    }

    async fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> DbResult<()> {
        debug!(key = %key, at = %at, "Updating sync state");

        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(at.to_rfc3339())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::on_write)?;

        Ok(())
    }
}
