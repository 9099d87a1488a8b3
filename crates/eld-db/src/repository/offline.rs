//! # Offline Record Repository
//!
//! The local, crash-safe queue of telemetry awaiting upload.
//!
//! ## Record Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Offline Record Lifecycle                             │
//! │                                                                         │
//! │  Device notify ─► IngestQueue ─► store()                               │
//! │                                    │                                    │
//! │                                    ▼                                    │
//! │                        ┌───────────────────────┐                        │
//! │                        │ synced=0, attempts=0  │◄──────┐                │
//! │                        └───────────┬───────────┘       │                │
//! │                                    │ SyncEngine        │ record_failure │
//! │                         upload ok? │                   │ attempts+1     │
//! │                      ┌─────────────┴───────────┐       │                │
//! │                      ▼ yes                     ▼ no ───┘                │
//! │            mark_synced(ids)                                            │
//! │            synced=1, attempts+1                                        │
//! │                      │                                                  │
//! │                      ▼                                                  │
//! │            clear_synced() ─► row removed                               │
//! │                                                                         │
//! │  GUARANTEES:                                                           │
//! │  • store() never overwrites an existing id                             │
//! │  • unsynced rows cannot be deleted (trigger)                           │
//! │  • attempts never decreases, synced never flips back (trigger)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::{DbResult, PersistenceError};
use eld_core::{OfflineRecord, TelemetryRecord};

/// Row shape of `offline_records`.
#[derive(Debug, sqlx::FromRow)]
struct OfflineRecordRow {
    id: String,
    payload: String,
    origin: String,
    captured_at: DateTime<Utc>,
    received_at: DateTime<Utc>,
    synced: bool,
    synced_at: Option<DateTime<Utc>>,
    attempts: i64,
    last_error: Option<String>,
}

impl TryFrom<OfflineRecordRow> for OfflineRecord {
    type Error = PersistenceError;

    fn try_from(row: OfflineRecordRow) -> Result<Self, Self::Error> {
        let payload = serde_json::from_str(&row.payload).map_err(|e| PersistenceError::Corrupt {
            id: row.id.clone(),
            reason: e.to_string(),
        })?;

        Ok(OfflineRecord {
            id: row.id,
            payload,
            origin: row.origin,
            captured_at: row.captured_at,
            received_at: row.received_at,
            synced: row.synced,
            synced_at: row.synced_at,
            attempts: row.attempts,
            last_error: row.last_error,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, payload, origin, captured_at, received_at,
           synced, synced_at, attempts, last_error
    FROM offline_records
"#;

/// Aggregate counts over all offline records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub total: i64,
    pub synced: i64,
    pub unsynced: i64,
}

/// Repository for offline telemetry records.
#[derive(Debug, Clone)]
pub struct OfflineRecordRepository {
    pool: SqlitePool,
}

impl OfflineRecordRepository {
    /// Creates a new OfflineRecordRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OfflineRecordRepository { pool }
    }

    /// Durably stores a new telemetry record as unsynced.
    ///
    /// The write is committed before this returns; a crash afterwards does
    /// not lose the record.
    ///
    /// ## Returns
    /// * `Ok(OfflineRecord)` - Stored row, `synced=false`, `attempts=0`
    /// * `Err(PersistenceError::Duplicate)` - id already stored; the existing
    ///   row is left untouched
    /// * `Err(PersistenceError::Unavailable)` - Store unreachable
    pub async fn store(&self, record: TelemetryRecord) -> DbResult<OfflineRecord> {
        let offline = OfflineRecord::from_telemetry(record, Utc::now());
        let payload = offline.payload.to_string();

        debug!(id = %offline.id, origin = %offline.origin, "Storing offline record");

        sqlx::query(
            r#"
            INSERT INTO offline_records (
                id, payload, origin, captured_at, received_at,
                synced, synced_at, attempts, last_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, 0, NULL)
            "#,
        )
        .bind(&offline.id)
        .bind(&payload)
        .bind(&offline.origin)
        .bind(offline.captured_at)
        .bind(offline.received_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match PersistenceError::on_write(e) {
            PersistenceError::Duplicate(_) => PersistenceError::Duplicate(offline.id.clone()),
            other => other,
        })?;

        Ok(offline)
    }

    /// Returns every unsynced record in arrival order.
    ///
    /// Records that failed before are included; there is no retry cap.
    pub async fn unsynced_records(&self) -> DbResult<Vec<OfflineRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE synced = 0 ORDER BY seq ASC");
        self.fetch(&sql, None).await
    }

    /// Returns at most `limit` unsynced records in arrival order.
    pub async fn unsynced_batch(&self, limit: u32) -> DbResult<Vec<OfflineRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE synced = 0 ORDER BY seq ASC LIMIT ?1");
        self.fetch(&sql, Some(limit)).await
    }

    /// Looks up a single record.
    pub async fn get(&self, id: &str) -> DbResult<Option<OfflineRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row: Option<OfflineRecordRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistenceError::on_read)?;

        row.map(OfflineRecord::try_from).transpose()
    }

    async fn fetch(&self, sql: &str, limit: Option<u32>) -> DbResult<Vec<OfflineRecord>> {
        let mut query = sqlx::query_as::<_, OfflineRecordRow>(sql);
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(PersistenceError::on_read)?;

        rows.into_iter().map(OfflineRecord::try_from).collect()
    }

    /// Marks records as uploaded.
    ///
    /// Applied in one transaction: either every listed record flips to
    /// synced or none does. Already-synced records are left unchanged, so
    /// repeating the call is a no-op.
    ///
    /// ## Returns
    /// Number of records that transitioned to synced.
    pub async fn mark_synced(&self, ids: &[String]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(PersistenceError::on_write)?;
        let mut updated = 0u64;

        for id in ids {
            let result = sqlx::query(
                r#"
                UPDATE offline_records SET
                    synced = 1,
                    synced_at = ?2,
                    attempts = attempts + 1
                WHERE id = ?1 AND synced = 0
                "#,
            )
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::on_write)?;

            updated += result.rows_affected();
        }

        tx.commit().await.map_err(PersistenceError::on_write)?;

        debug!(requested = ids.len(), updated, "Marked records synced");
        Ok(updated)
    }

    /// Records a failed upload attempt for one record.
    ///
    /// The record stays unsynced and eligible for the next run.
    pub async fn record_failure(&self, id: &str, error: &str) -> DbResult<()> {
        self.record_failures(&[id.to_string()], error).await
    }

    /// Records a failed upload attempt for every record in a batch.
    pub async fn record_failures(&self, ids: &[String], error: &str) -> DbResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(PersistenceError::on_write)?;

        for id in ids {
            sqlx::query(
                r#"
                UPDATE offline_records SET
                    attempts = attempts + 1,
                    last_error = ?2
                WHERE id = ?1 AND synced = 0
                "#,
            )
            .bind(id)
            .bind(error)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::on_write)?;
        }

        tx.commit().await.map_err(PersistenceError::on_write)?;

        warn!(count = ids.len(), error = %error, "Recorded upload failure");
        Ok(())
    }

    /// Deletes every synced record. Unsynced records are never touched.
    ///
    /// ## Returns
    /// Number of deleted records.
    pub async fn clear_synced(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM offline_records WHERE synced = 1")
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::on_write)?;

        info!(deleted = result.rows_affected(), "Cleared synced records");
        Ok(result.rows_affected())
    }

    /// Deletes synced records whose upload is older than `days`.
    pub async fn clear_synced_older_than(&self, days: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));

        let result = sqlx::query(
            r#"
            DELETE FROM offline_records
            WHERE synced = 1
            AND synced_at IS NOT NULL
            AND synced_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::on_write)?;

        info!(
            deleted = result.rows_affected(),
            days,
            "Cleared aged synced records"
        );
        Ok(result.rows_affected())
    }

    /// Counts total, synced and unsynced records.
    pub async fn counts(&self) -> DbResult<RecordCounts> {
        let (total, synced): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(synced) FROM offline_records",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(PersistenceError::on_read)?;

        let synced = synced.unwrap_or(0);
        Ok(RecordCounts {
            total,
            synced,
            unsynced: total - synced,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
