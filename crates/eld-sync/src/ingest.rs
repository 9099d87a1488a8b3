//! # Telemetry Ingest Queue
//!
//! The only path that appends to the durability store.
//!
//! ```text
//! notify pump ──► mpsc<TelemetryRecord> ──► worker ──► offline_records().store()
//!                                             │  ok ──► broadcast<OfflineRecord> (taps)
//!                                             │       └► SyncEngine::refresh_status()
//!                                             └ err ──► log + dropped += 1
//! ```
//!
//! A store failure never blocks or crashes the device pipeline: the record
//! is logged, counted as dropped, and the worker moves on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use eld_core::{OfflineRecord, TelemetryRecord};
use eld_db::{Database, PersistenceError};

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};

/// Records buffered between the device pipeline and the store.
const QUEUE_CAPACITY: usize = 1024;

/// Stored records buffered for slow taps.
const TAP_CAPACITY: usize = 256;

// =============================================================================
// Stats
// =============================================================================

/// Ingest counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub stored: u64,
    pub dropped: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    stored: AtomicU64,
    dropped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Counters {
    fn snapshot(&self) -> IngestStats {
        IngestStats {
            stored: self.stored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    fn drop_record(&self, err: &PersistenceError) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }
}

// =============================================================================
// Ingest Queue
// =============================================================================

/// Handle to the ingest worker.
pub struct TelemetryIngestQueue {
    tx: mpsc::Sender<TelemetryRecord>,
    taps: broadcast::Sender<OfflineRecord>,
    counters: Arc<Counters>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TelemetryIngestQueue {
    /// Spawns the worker.
    ///
    /// When `engine` is given, its status is refreshed after every stored
    /// record so the pending-records indicator stays current.
    pub fn spawn(db: Database, engine: Option<SyncEngine>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (taps, _) = broadcast::channel(TAP_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            db,
            engine,
            taps: taps.clone(),
            counters: Arc::clone(&counters),
        };
        let task = tokio::spawn(worker.run(rx, shutdown_rx));

        TelemetryIngestQueue {
            tx,
            taps,
            counters,
            shutdown_tx,
            task,
        }
    }

    /// Sender for the device pipeline.
    pub fn sender(&self) -> mpsc::Sender<TelemetryRecord> {
        self.tx.clone()
    }

    /// Queues one record.
    pub async fn ingest(&self, record: TelemetryRecord) -> SyncResult<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| SyncError::ChannelError("Ingest queue closed".into()))
    }

    /// Receives every record once it is durably stored.
    pub fn subscribe(&self) -> broadcast::Receiver<OfflineRecord> {
        self.taps.subscribe()
    }

    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// Stores everything already queued, then stops the worker.
    pub async fn shutdown(self) -> IngestStats {
        let _ = self.shutdown_tx.send(());
        if let Err(err) = self.task.await {
            error!(error = %err, "Ingest worker failed");
        }
        self.counters.snapshot()
    }
}

struct Worker {
    db: Database,
    engine: Option<SyncEngine>,
    taps: broadcast::Sender<OfflineRecord>,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::Receiver<TelemetryRecord>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        info!("Ingest worker started");

        loop {
            tokio::select! {
                record = rx.recv() => match record {
                    Some(record) => self.store(record).await,
                    None => break,
                },
                _ = &mut shutdown_rx => {
                    rx.close();
                    while let Some(record) = rx.recv().await {
                        self.store(record).await;
                    }
                    break;
                }
            }
        }

        info!(stored = self.counters.stored.load(Ordering::Relaxed), "Ingest worker stopped");
    }

    async fn store(&self, record: TelemetryRecord) {
        let id = record.id.clone();

        match self.db.offline_records().store(record).await {
            Ok(stored) => {
                self.counters.stored.fetch_add(1, Ordering::Relaxed);
                debug!(id = %stored.id, "Telemetry stored");
                let _ = self.taps.send(stored);

                if let Some(engine) = &self.engine {
                    if let Err(err) = engine.refresh_status().await {
                        warn!(error = %err, "Failed to refresh sync status");
                    }
                }
            }
            Err(err @ PersistenceError::Duplicate(_)) => {
                warn!(id = %id, "Duplicate telemetry record dropped");
                self.counters.drop_record(&err);
            }
            Err(err) => {
                error!(
                    id = %id,
                    kind = ?err.kind(),
                    error = %err,
                    "Durability store rejected telemetry, record dropped"
                );
                self.counters.drop_record(&err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BatchSink;
    use async_trait::async_trait;
    use eld_db::DbConfig;
    use serde_json::json;

    struct NullSink;

    #[async_trait]
    impl BatchSink for NullSink {
        async fn upload_batch(&self, _: &str, _: &[OfflineRecord]) -> SyncResult<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "null"
        }
    }

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn record(n: u32) -> TelemetryRecord {
        TelemetryRecord::new(json!({ "n": n }), "PT30")
    }

    #[tokio::test]
    async fn test_records_stored_in_arrival_order() {
        let db = setup().await;
        let queue = TelemetryIngestQueue::spawn(db.clone(), None);

        let mut ids = Vec::new();
        for n in 0..5 {
            let next = record(n);
            ids.push(next.id.clone());
            queue.ingest(next).await.unwrap();
        }
        let stats = queue.shutdown().await;

        assert_eq!(stats.stored, 5);
        assert_eq!(stats.dropped, 0);

        let stored: Vec<String> = db
            .offline_records()
            .unsynced_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(stored, ids);
    }

    #[tokio::test]
    async fn test_taps_see_stored_records() {
        let queue = TelemetryIngestQueue::spawn(setup().await, None);
        let mut tap = queue.subscribe();

        let first = record(1);
        let id = first.id.clone();
        queue.sender().send(first).await.unwrap();

        let stored = tap.recv().await.unwrap();
        assert_eq!(stored.id, id);
        assert!(!stored.synced);
    }

    #[tokio::test]
    async fn test_duplicate_is_dropped_not_fatal() {
        let db = setup().await;
        let queue = TelemetryIngestQueue::spawn(db.clone(), None);

        let dup = record(1);
        queue.ingest(dup.clone()).await.unwrap();
        queue.ingest(dup).await.unwrap();
        queue.ingest(record(2)).await.unwrap();
        let stats = queue.shutdown().await;

        assert_eq!(stats.stored, 2);
        assert_eq!(stats.dropped, 1);
        assert!(stats.last_error.unwrap().contains("Duplicate"));
    }

    #[tokio::test]
    async fn test_unavailable_store_drops_and_continues() {
        let db = setup().await;
        let queue = TelemetryIngestQueue::spawn(db.clone(), None);
        db.close().await;

        for n in 0..3 {
            queue.ingest(record(n)).await.unwrap();
        }
        let stats = queue.shutdown().await;

        assert_eq!(stats.stored, 0);
        assert_eq!(stats.dropped, 3);
    }

    #[tokio::test]
    async fn test_refreshes_engine_status() {
        let db = setup().await;
        let engine = SyncEngine::new(db.clone(), Arc::new(NullSink), 50);
        let queue = TelemetryIngestQueue::spawn(db, Some(engine.clone()));

        queue.ingest(record(1)).await.unwrap();
        queue.ingest(record(2)).await.unwrap();
        queue.shutdown().await;

        assert_eq!(engine.status().unsynced_records, 2);
    }
}
