//! # Sync Engine
//!
//! Uploads unsynced offline records in fixed-size batches.
//!
//! ## Run Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         sync_pending()                                  │
//! │                                                                         │
//! │  syncing.swap(true) ── already true ──► SyncReport::skipped()          │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  unsynced_records()  (arrival order)  ── empty ──► empty report        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  chunks(batch_size) ── for each batch, one at a time ──┐                │
//! │                                                        ▼                │
//! │               primary.upload_batch(batch_id, records)                  │
//! │                 │ Ok                         │ Err                      │
//! │                 ▼                            ▼                          │
//! │           mark_synced(ids)            record_failures(ids, err)        │
//! │           mirrors (best effort)       continue with next batch         │
//! │                                                                         │
//! │  set last_sync_attempt / last_sync_success, publish SyncStatus         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine never schedules itself. Timers, connectivity triggers and
//! manual pulls all call [`SyncEngine::sync_pending`]; overlapping calls are
//! skipped rather than queued.

use chrono::Utc;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use eld_core::{OfflineRecord, SyncStatus};
use eld_db::Database;

use crate::error::{SyncError, SyncResult};
use crate::sink::BatchSink;

/// Most recent batch errors kept in a [`SyncReport`].
const MAX_REPORTED_ERRORS: usize = 10;

// =============================================================================
// Sync Report
// =============================================================================

/// Outcome of one `sync_pending()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records uploaded to the primary sink and marked synced.
    pub success: usize,

    /// Records in batches the primary sink rejected.
    pub failed: usize,

    /// Most recent batch errors, oldest first.
    pub errors: Vec<String>,

    /// True when another run was already in progress.
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        SyncReport {
            skipped: true,
            ..SyncReport::default()
        }
    }

    /// Records processed in this run.
    pub fn processed(&self) -> usize {
        self.success + self.failed
    }

    /// Converts a run with failed batches into [`SyncError::PartialFailure`].
    pub fn into_result(self) -> SyncResult<SyncReport> {
        if self.failed > 0 {
            return Err(SyncError::PartialFailure {
                failed_count: self.failed,
                last_errors: self.errors,
            });
        }
        Ok(self)
    }

    fn push_error(&mut self, error: String) {
        if self.errors.len() == MAX_REPORTED_ERRORS {
            self.errors.remove(0);
        }
        self.errors.push(error);
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Batches unsynced records to a primary sink and optional mirrors.
///
/// Cheap to clone; clones share the reentrancy flag and status channel.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    db: Database,
    primary: Arc<dyn BatchSink>,
    mirrors: Vec<Arc<dyn BatchSink>>,
    batch_size: usize,
    syncing: AtomicBool,
    status_tx: watch::Sender<SyncStatus>,
}

/// Clears the syncing flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    /// Creates an engine uploading to `primary`.
    ///
    /// A `batch_size` of zero is treated as one.
    pub fn new(db: Database, primary: Arc<dyn BatchSink>, batch_size: usize) -> Self {
        Self::with_mirrors(db, primary, Vec::new(), batch_size)
    }

    /// Creates an engine that also mirrors every accepted batch.
    pub fn with_mirrors(
        db: Database,
        primary: Arc<dyn BatchSink>,
        mirrors: Vec<Arc<dyn BatchSink>>,
        batch_size: usize,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());

        SyncEngine {
            inner: Arc::new(EngineInner {
                db,
                primary,
                mirrors,
                batch_size: batch_size.max(1),
                syncing: AtomicBool::new(false),
                status_tx,
            }),
        }
    }

    /// Returns true while a run is in progress.
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    /// Latest published status.
    pub fn status(&self) -> SyncStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Recomputes the status from the store and publishes it.
    pub async fn refresh_status(&self) -> SyncResult<SyncStatus> {
        let status = self.inner.db.sync_status(self.is_syncing()).await?;
        self.inner.status_tx.send_replace(status.clone());
        Ok(status)
    }

    /// Uploads every unsynced record.
    ///
    /// ## Returns
    /// * `Ok(report)` - Run finished; `report.failed` may be non-zero
    /// * `Ok(report)` with `skipped = true` - Another run is in progress
    /// * `Err(SyncError::Persistence)` - The store failed mid-run
    ///
    /// Use [`SyncReport::into_result`] to surface failed batches as
    /// [`SyncError::PartialFailure`].
    pub async fn sync_pending(&self) -> SyncResult<SyncReport> {
        if self.inner.syncing.swap(true, Ordering::AcqRel) {
            debug!("Sync already in progress, skipping");
            return Ok(SyncReport::skipped());
        }
        let guard = RunGuard(&self.inner.syncing);

        let records = self.inner.db.offline_records().unsynced_records().await?;
        if records.is_empty() {
            debug!("No unsynced records");
            return Ok(SyncReport::default());
        }

        self.inner.status_tx.send_modify(|s| s.is_syncing = true);
        let outcome = self.run_batches(&records).await;
        drop(guard);
        self.inner.status_tx.send_modify(|s| s.is_syncing = false);

        let report = outcome?;
        self.refresh_status().await?;

        info!(
            success = report.success,
            failed = report.failed,
            "Sync run finished"
        );
        Ok(report)
    }

    async fn run_batches(&self, records: &[OfflineRecord]) -> SyncResult<SyncReport> {
        let state = self.inner.db.sync_state();
        state.set_last_sync_attempt(Utc::now()).await?;

        info!(
            count = records.len(),
            batch_size = self.inner.batch_size,
            sink = self.inner.primary.name(),
            "Starting sync run"
        );

        let mut report = SyncReport::default();
        for batch in records.chunks(self.inner.batch_size) {
            self.sync_batch(batch, &mut report).await?;
        }

        if report.failed == 0 {
            state.set_last_sync_success(Utc::now()).await?;
        }
        Ok(report)
    }

    async fn sync_batch(&self, batch: &[OfflineRecord], report: &mut SyncReport) -> SyncResult<()> {
        let batch_id = Uuid::new_v4().to_string();
        let ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
        let records = self.inner.db.offline_records();

        match self.inner.primary.upload_batch(&batch_id, batch).await {
            Ok(()) => {
                records.mark_synced(&ids).await?;
                report.success += batch.len();
                debug!(batch_id = %batch_id, count = batch.len(), "Batch synced");
                self.mirror(&batch_id, batch).await;
            }
            Err(err) => {
                let message = err.to_string();
                warn!(
                    batch_id = %batch_id,
                    count = batch.len(),
                    error = %message,
                    "Batch upload failed"
                );
                records.record_failures(&ids, &message).await?;
                report.failed += batch.len();
                report.push_error(message);
            }
        }

        Ok(())
    }

    /// Sends an accepted batch to every mirror. Failures are only logged.
    async fn mirror(&self, batch_id: &str, batch: &[OfflineRecord]) {
        if self.inner.mirrors.is_empty() {
            return;
        }

        let uploads = self
            .inner
            .mirrors
            .iter()
            .map(|sink| async move { (sink.name(), sink.upload_batch(batch_id, batch).await) });

        for (name, result) in join_all(uploads).await {
            if let Err(err) = result {
                warn!(mirror = name, batch_id, error = %err, "Mirror upload failed");
            }
        }
    }

    /// Deletes synced records older than `days`, then republishes status.
    pub async fn prune_synced(&self, days: u32) -> SyncResult<u64> {
        let deleted = self
            .inner
            .db
            .offline_records()
            .clear_synced_older_than(days)
            .await?;
        self.refresh_status().await?;
        Ok(deleted)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eld_core::TelemetryRecord;
    use eld_db::DbConfig;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Records every batch and fails the calls listed in `fail_calls`.
    #[derive(Default)]
    struct ScriptedSink {
        name: &'static str,
        fail_calls: Vec<usize>,
        batches: Mutex<Vec<Vec<String>>>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl ScriptedSink {
        fn failing_on(calls: &[usize]) -> Self {
            ScriptedSink {
                name: "scripted",
                fail_calls: calls.to_vec(),
                ..Default::default()
            }
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSink for ScriptedSink {
        async fn upload_batch(&self, _batch_id: &str, records: &[OfflineRecord]) -> SyncResult<()> {
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }

            let call = {
                let mut batches = self.batches.lock().unwrap();
                batches.push(records.iter().map(|r| r.id.clone()).collect());
                batches.len()
            };

            if self.fail_calls.contains(&call) {
                return Err(SyncError::BatchUploadFailed {
                    cause: format!("HTTP 503 on call {call}"),
                });
            }
            Ok(())
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    async fn setup_with(count: usize) -> (Database, Vec<String>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut ids = Vec::new();
        for i in 0..count {
            let record = TelemetryRecord::new(json!({ "n": i }), "PT30");
            ids.push(db.offline_records().store(record).await.unwrap().id);
        }
        (db, ids)
    }

    #[tokio::test]
    async fn test_failed_batch_is_isolated() {
        let (db, ids) = setup_with(120).await;
        let sink = Arc::new(ScriptedSink::failing_on(&[2]));
        let engine = SyncEngine::new(db.clone(), sink.clone(), 50);

        let report = engine.sync_pending().await.unwrap();

        let sizes: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(report.success, 70);
        assert_eq!(report.failed, 50);
        assert_eq!(report.errors.len(), 1);

        let counts = db.offline_records().counts().await.unwrap();
        assert_eq!(counts.synced, 70);
        assert_eq!(counts.unsynced, 50);

        let failed = db.offline_records().get(&ids[60]).await.unwrap().unwrap();
        assert!(!failed.synced);
        assert_eq!(failed.attempts, 1);
        assert!(failed.last_error.unwrap().contains("503"));

        let synced = db.offline_records().get(&ids[110]).await.unwrap().unwrap();
        assert!(synced.synced);
        assert_eq!(synced.attempts, 1);

        match report.into_result() {
            Err(SyncError::PartialFailure { failed_count, .. }) => assert_eq!(failed_count, 50),
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uploads_in_arrival_order() {
        let (db, ids) = setup_with(7).await;
        let sink = Arc::new(ScriptedSink::default());
        let engine = SyncEngine::new(db, sink.clone(), 3);

        engine.sync_pending().await.unwrap();

        let uploaded: Vec<String> = sink.batches().into_iter().flatten().collect();
        assert_eq!(uploaded, ids);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let (db, _) = setup_with(10).await;
        let sink = Arc::new(ScriptedSink::default());
        let engine = SyncEngine::new(db, sink.clone(), 50);

        assert_eq!(engine.sync_pending().await.unwrap().success, 10);

        let again = engine.sync_pending().await.unwrap();
        assert_eq!(again, SyncReport::default());
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_store_is_not_an_error() {
        let (db, _) = setup_with(0).await;
        let sink = Arc::new(ScriptedSink::default());
        let engine = SyncEngine::new(db, sink.clone(), 50);

        let report = engine.sync_pending().await.unwrap().into_result().unwrap();
        assert_eq!(report.processed(), 0);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_failed_records_retry_next_run() {
        let (db, ids) = setup_with(5).await;
        let sink = Arc::new(ScriptedSink::failing_on(&[1]));
        let engine = SyncEngine::new(db.clone(), sink.clone(), 50);

        assert_eq!(engine.sync_pending().await.unwrap().failed, 5);
        assert_eq!(engine.sync_pending().await.unwrap().success, 5);

        let record = db.offline_records().get(&ids[0]).await.unwrap().unwrap();
        assert!(record.synced);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_skipped() {
        let (db, _) = setup_with(3).await;
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let sink = Arc::new(ScriptedSink {
            name: "gated",
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        let engine = SyncEngine::new(db, sink.clone(), 50);

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync_pending().await })
        };
        entered.notified().await;
        assert!(engine.is_syncing());
        assert!(engine.status().is_syncing);

        let second = engine.sync_pending().await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.processed(), 0);

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.success, 3);
        assert!(!engine.is_syncing());
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_mirror_failure_keeps_primary_success() {
        let (db, _) = setup_with(4).await;
        let primary = Arc::new(ScriptedSink::default());
        let mirror = Arc::new(ScriptedSink::failing_on(&[1]));
        let engine = SyncEngine::with_mirrors(db.clone(), primary, vec![mirror.clone()], 50);

        let report = engine.sync_pending().await.unwrap();

        assert_eq!(report.success, 4);
        assert_eq!(report.failed, 0);
        assert_eq!(mirror.batches().len(), 1);
        assert_eq!(db.offline_records().counts().await.unwrap().unsynced, 0);
    }

    #[tokio::test]
    async fn test_status_published_after_run() {
        let (db, _) = setup_with(3).await;
        let engine = SyncEngine::new(db, Arc::new(ScriptedSink::default()), 50);
        let mut status = engine.watch_status();

        engine.sync_pending().await.unwrap();

        assert!(status.has_changed().unwrap());
        let status = status.borrow_and_update().clone();
        assert_eq!(status.total_records, 3);
        assert_eq!(status.synced_records, 3);
        assert_eq!(status.unsynced_records, 0);
        assert!(status.last_sync_attempt.is_some());
        assert!(status.last_sync_success.is_some());
        assert!(!status.is_syncing);
    }

    #[tokio::test]
    async fn test_partial_run_keeps_last_success_unset() {
        let (db, _) = setup_with(3).await;
        let engine = SyncEngine::new(db, Arc::new(ScriptedSink::failing_on(&[1])), 50);

        engine.sync_pending().await.unwrap();

        let status = engine.status();
        assert!(status.last_sync_attempt.is_some());
        assert!(status.last_sync_success.is_none());
        assert_eq!(status.unsynced_records, 3);
    }

    #[tokio::test]
    async fn test_prune_keeps_unsynced() {
        let (db, _) = setup_with(3).await;
        let engine = SyncEngine::new(db.clone(), Arc::new(ScriptedSink::default()), 50);
        engine.sync_pending().await.unwrap();
        db.offline_records()
            .store(TelemetryRecord::new(json!({ "late": true }), "PT30"))
            .await
            .unwrap();

        engine.prune_synced(0).await.unwrap();

        let counts = db.offline_records().counts().await.unwrap();
        assert_eq!(counts.unsynced, 1);
        assert_eq!(engine.status().unsynced_records, 1);
    }
}
