//! # Sync Scheduler
//!
//! Triggers `sync_pending()` on a fixed interval and whenever the device
//! (re)authenticates. Retention pruning follows every clean run.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use eld_device::ConnectionState;
use eld_sync::SyncEngine;

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub interval: Duration,
    /// Synced records older than this many days are pruned. Zero disables.
    pub retention_days: u32,
}

pub struct SyncScheduler {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn spawn(
        engine: SyncEngine,
        config: ScheduleConfig,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(run(engine, config, connection, token.clone()));
        SyncScheduler { token, task }
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

async fn run(
    engine: SyncEngine,
    config: ScheduleConfig,
    mut connection: watch::Receiver<ConnectionState>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watching = true;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => sync_once(&engine, config.retention_days, "timer").await,
            changed = connection.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let state = *connection.borrow_and_update();
                if state == ConnectionState::Authenticated {
                    sync_once(&engine, config.retention_days, "connected").await;
                }
            }
        }
    }

    debug!("Sync scheduler stopped");
}

async fn sync_once(engine: &SyncEngine, retention_days: u32, trigger: &'static str) {
    let report = match engine.sync_pending().await {
        Ok(report) => report,
        Err(err) => {
            warn!(trigger, error = %err, retryable = err.is_retryable(), "Sync run failed");
            return;
        }
    };

    if report.skipped {
        debug!(trigger, "Sync already running");
        return;
    }
    if report.processed() == 0 {
        return;
    }

    match report.into_result() {
        Ok(report) => {
            info!(trigger, synced = report.success, "Sync run complete");
            if retention_days > 0 {
                match engine.prune_synced(retention_days).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, retention_days, "Pruned synced records"),
                    Err(err) => warn!(error = %err, "Prune failed"),
                }
            }
        }
        Err(err) => warn!(trigger, error = %err, "Sync run left records pending"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eld_core::{OfflineRecord, TelemetryRecord};
    use eld_db::{Database, DbConfig};
    use eld_sync::{BatchSink, SyncResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingSink {
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl BatchSink for CountingSink {
        async fn upload_batch(&self, _batch_id: &str, _records: &[OfflineRecord]) -> SyncResult<()> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    async fn setup() -> (Database, SyncEngine, Arc<CountingSink>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sink = Arc::new(CountingSink::default());
        let engine = SyncEngine::new(db.clone(), sink.clone(), 50);
        (db, engine, sink)
    }

    async fn store(db: &Database, count: usize) {
        for i in 0..count {
            let record = TelemetryRecord::new(serde_json::json!({ "seq": i }), "dev");
            db.offline_records().store(record).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_syncs_on_authentication() {
        let (db, engine, sink) = setup().await;
        store(&db, 3).await;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let scheduler = SyncScheduler::spawn(
            engine.clone(),
            ScheduleConfig {
                interval: Duration::from_secs(3600),
                retention_days: 0,
            },
            state_rx,
        );
        // First tick fires immediately and drains the store.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.uploads.load(Ordering::SeqCst), 1);

        store(&db, 2).await;
        state_tx.send_replace(ConnectionState::Authenticated);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.uploads.load(Ordering::SeqCst), 2);
        assert_eq!(engine.status().unsynced_records, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_ignores_other_states() {
        let (db, engine, sink) = setup().await;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let scheduler = SyncScheduler::spawn(
            engine,
            ScheduleConfig {
                interval: Duration::from_secs(3600),
                retention_days: 0,
            },
            state_rx,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        store(&db, 2).await;
        state_tx.send_replace(ConnectionState::Connecting);
        state_tx.send_replace(ConnectionState::Failed);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.uploads.load(Ordering::SeqCst), 0);
        scheduler.shutdown().await;
    }
}
