//! # eld-agent: Headless ELD Link Runner
//!
//! Wires the workspace crates into one process: device link, connection
//! supervisor, ingest queue, durability store, sync engine and compliance
//! monitors.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Agent Startup                                   │
//! │                                                                         │
//! │  1. init_tracing()          EnvFilter (RUST_LOG or default)             │
//! │  2. AgentConfig::load()     defaults < agent.toml < ELD_* env           │
//! │  3. Database::new()         SQLite file, migrations                     │
//! │  4. Agent::start()                                                      │
//! │       ├── SyncEngine        only when a backend URL is configured       │
//! │       ├── IngestQueue       single writer into offline_records          │
//! │       ├── ConnectionManager notify pump ─► ingest                       │
//! │       ├── readings feeder   ingest taps ─► watch<VehicleReading>        │
//! │       ├── Motion monitor    always                                      │
//! │       ├── Inactivity monitor only with a compliance API URL             │
//! │       ├── ConnectSupervisor backoff reconnect loop                      │
//! │       └── SyncScheduler     interval + on (re)authentication            │
//! │  5. shutdown_signal()       Ctrl+C / SIGTERM                            │
//! │  6. Agent::shutdown()       reverse order, ingest drained last          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod scheduler;
pub mod simulator;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use eld_compliance::{
    ComplianceApi, HttpComplianceApi, InactivityConfig, InactivityEvent, InactivityMonitor,
    MotionRestrictionMonitor, VehicleReading,
};
use eld_core::{MotionRestrictionState, OfflineRecord};
use eld_db::{Database, DbConfig};
use eld_device::{ConnectConfig, ConnectionManager, DeviceLink};
use eld_sync::{AgentConfig, BatchSink, HttpBatchSink, IngestStats, SyncEngine, TelemetryIngestQueue};

pub use error::{AgentError, AgentResult};
use scheduler::{ScheduleConfig, SyncScheduler};
use supervisor::{ConnectSupervisor, SupervisorConfig};

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=eld=trace` - Show trace for eld crates only
/// - Default: `info,eld=debug,sqlx=warn`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eld=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Opens the store, starts the agent and runs until a shutdown signal.
pub async fn run(config: AgentConfig, link: Arc<dyn DeviceLink>) -> AgentResult<()> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(path = ?db_path, "Opening durability store");
    let db = Database::new(DbConfig::new(&db_path)).await?;

    let agent = Agent::start(db.clone(), &config, link)?;

    shutdown_signal().await;

    let stats = agent.shutdown().await;
    info!(
        stored = stats.stored,
        dropped = stats.dropped,
        "Agent stopped"
    );
    db.close().await;
    Ok(())
}

// =============================================================================
// Agent
// =============================================================================

/// Every long-running piece of the pipeline.
pub struct Agent {
    manager: ConnectionManager,
    ingest: TelemetryIngestQueue,
    engine: Option<SyncEngine>,
    motion: MotionRestrictionMonitor,
    inactivity: Option<InactivityMonitor>,
    supervisor: ConnectSupervisor,
    scheduler: Option<SyncScheduler>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    /// Builds and starts the pipeline on an open database.
    ///
    /// ## Errors
    /// A backend or compliance URL that cannot be turned into a client.
    pub fn start(db: Database, config: &AgentConfig, link: Arc<dyn DeviceLink>) -> AgentResult<Self> {
        let engine = build_engine(&db, config)?;
        let ingest = TelemetryIngestQueue::spawn(db, engine.clone());

        let manager = ConnectionManager::new(
            link,
            ConnectConfig {
                auth_timeout: config.auth_timeout(),
                need_pair: config.device.need_pair,
                ..ConnectConfig::default()
            },
        )
        .with_telemetry_sink(ingest.sender());

        let token = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        let (readings_tx, readings_rx) = watch::channel(VehicleReading::default());
        tasks.push(tokio::spawn(feed_readings(
            ingest.subscribe(),
            readings_tx,
            token.clone(),
        )));

        let poll_interval = Duration::from_millis(config.compliance.poll_interval_ms);
        let motion = MotionRestrictionMonitor::spawn(
            config.compliance.speed_threshold_mph,
            poll_interval,
            readings_rx.clone(),
        );

        let inactivity = match &config.compliance.api_url {
            Some(url) => {
                let api: Arc<dyn ComplianceApi> =
                    Arc::new(HttpComplianceApi::new(url, config.request_timeout())?);
                let inactivity_config = InactivityConfig {
                    threshold_mph: config.compliance.speed_threshold_mph,
                    inactivity: Duration::from_secs(config.compliance.inactivity_secs),
                    prompt_timeout: Duration::from_secs(config.compliance.prompt_timeout_secs),
                    poll_interval,
                };
                Some(InactivityMonitor::spawn(inactivity_config, readings_rx, api))
            }
            None => {
                info!("No compliance API configured, inactivity monitor disabled");
                None
            }
        };

        tasks.push(tokio::spawn(report_compliance(
            motion.watch(),
            inactivity.as_ref().map(InactivityMonitor::subscribe),
            token.clone(),
        )));

        let supervisor = ConnectSupervisor::spawn(
            manager.clone(),
            SupervisorConfig::from_settings(&config.device),
        );

        let scheduler = engine.clone().map(|engine| {
            SyncScheduler::spawn(
                engine,
                ScheduleConfig {
                    interval: config.sync_interval(),
                    retention_days: config.sync.retention_days,
                },
                manager.watch_state(),
            )
        });

        info!(sync_enabled = engine.is_some(), "Agent started");

        Ok(Agent {
            manager,
            ingest,
            engine,
            motion,
            inactivity,
            supervisor,
            scheduler,
            token,
            tasks,
        })
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn sync_engine(&self) -> Option<&SyncEngine> {
        self.engine.as_ref()
    }

    pub fn motion_state(&self) -> MotionRestrictionState {
        self.motion.state()
    }

    /// Records the co-driver logging in on this device.
    pub fn co_driver_login(&self) {
        self.motion.co_driver_login();
    }

    pub fn co_driver_logout(&self) {
        self.motion.co_driver_logout();
    }

    /// The driver answered the inactivity prompt.
    pub fn acknowledge_inactivity(&self) {
        if let Some(inactivity) = &self.inactivity {
            inactivity.acknowledge();
        }
    }

    pub fn ingest_stats(&self) -> IngestStats {
        self.ingest.stats()
    }

    /// Stops everything. Telemetry already queued is still stored.
    pub async fn shutdown(self) -> IngestStats {
        info!("Agent shutting down");

        self.supervisor.shutdown().await;
        self.manager.disconnect().await;

        if let Some(scheduler) = self.scheduler {
            scheduler.shutdown().await;
        }
        if let Some(inactivity) = self.inactivity {
            inactivity.shutdown().await;
        }
        self.motion.shutdown().await;

        self.token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }

        self.ingest.shutdown().await
    }
}

fn build_engine(db: &Database, config: &AgentConfig) -> AgentResult<Option<SyncEngine>> {
    let Some(url) = config.sync.backend_url.as_deref() else {
        info!("No backend configured, records stay local");
        return Ok(None);
    };

    let primary: Arc<dyn BatchSink> = Arc::new(HttpBatchSink::new(url, config.request_timeout())?);
    let mirrors = config
        .sync
        .mirror_urls
        .iter()
        .map(|mirror| {
            HttpBatchSink::new(mirror, config.request_timeout())
                .map(|sink| Arc::new(sink) as Arc<dyn BatchSink>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(url = %url, mirrors = mirrors.len(), batch_size = config.sync.batch_size, "Sync enabled");
    Ok(Some(SyncEngine::with_mirrors(
        db.clone(),
        primary,
        mirrors,
        config.sync.batch_size,
    )))
}

// =============================================================================
// Background Tasks
// =============================================================================

/// Turns stored telemetry into the latest reading for the monitors.
async fn feed_readings(
    mut taps: broadcast::Receiver<OfflineRecord>,
    readings: watch::Sender<VehicleReading>,
    token: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            _ = token.cancelled() => break,
            record = taps.recv() => record,
        };

        match record {
            Ok(record) => {
                if let Some(sample) = record.sample() {
                    readings.send_replace(VehicleReading::from(&sample));
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Readings feeder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Surfaces compliance changes in the log. A UI would subscribe here.
async fn report_compliance(
    mut motion: watch::Receiver<MotionRestrictionState>,
    inactivity: Option<broadcast::Receiver<InactivityEvent>>,
    token: CancellationToken,
) {
    let mut motion_open = true;
    let mut inactivity_open = inactivity.is_some();
    let mut inactivity = inactivity;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = motion.changed(), if motion_open => {
                if changed.is_err() {
                    motion_open = false;
                    continue;
                }
                let state = motion.borrow_and_update().clone();
                info!(
                    moving = state.is_vehicle_in_motion,
                    can_make_entries = state.can_make_entries,
                    can_switch_roles = state.can_switch_roles,
                    can_edit_records = state.can_edit_records,
                    "Motion restrictions updated"
                );
            }
            event = recv_event(&mut inactivity), if inactivity_open => match event {
                Ok(InactivityEvent::Prompt { stopped_for }) => {
                    warn!(stopped_secs = stopped_for.as_secs(), "Driver prompt: still driving?");
                }
                Ok(InactivityEvent::AutoSwitchFailed { error }) => {
                    warn!(error = %error, "Automatic duty status change failed");
                }
                Ok(event) => info!(?event, "Inactivity event"),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => inactivity_open = false,
            },
        }
    }
}

async fn recv_event(
    rx: &mut Option<broadcast::Receiver<InactivityEvent>>,
) -> Result<InactivityEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Waits for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
