//! # Connection Supervisor
//!
//! Keeps the ELD connected. The state machine never retries on its own;
//! this loop owns the retry policy.
//!
//! ```text
//!   ┌──► resolve address (configured, or scan) ──► connect()
//!   │                                                │
//!   │        Ok ◄───────────────────────────────────┤
//!   │        │  reset backoff                        │ Err
//!   │        ▼                                       ▼
//!   │   wait for link loss              retryable? ──no──► stop (needs driver)
//!   │        │                               │ yes
//!   └─── backoff sleep ◄─────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use eld_device::{ConnectError, ConnectionManager, ConnectionState, ScanFilter};
use eld_sync::DeviceSettings;

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Connect target. When unset every attempt scans first.
    pub address: Option<String>,
    pub imei: String,
    pub passcode: Option<String>,
    pub scan_duration: Duration,
    pub name_prefixes: Vec<String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl SupervisorConfig {
    pub fn from_settings(settings: &DeviceSettings) -> Self {
        SupervisorConfig {
            address: settings.address.clone(),
            imei: settings.imei.clone(),
            passcode: settings.passcode.clone(),
            scan_duration: Duration::from_secs(settings.scan_duration_secs),
            name_prefixes: settings.name_prefixes.clone(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Handle to the running supervisor loop.
pub struct ConnectSupervisor {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectSupervisor {
    pub fn spawn(manager: ConnectionManager, config: SupervisorConfig) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(run(manager, config, token.clone()));
        ConnectSupervisor { token, task }
    }

    /// True once the loop has given up or been shut down.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop. The caller still owns the manager and disconnects it.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

async fn run(manager: ConnectionManager, config: SupervisorConfig, token: CancellationToken) {
    info!(address = ?config.address, "Connect supervisor starting");

    let mut backoff = config.create_backoff();
    let mut state = manager.watch_state();
    let mut retry_count = 0u32;

    loop {
        let attempt = tokio::select! {
            _ = token.cancelled() => break,
            result = connect_once(&manager, &config) => result,
        };

        match attempt {
            Ok(address) => {
                backoff.reset();
                retry_count = 0;

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = state.wait_for(|s| *s != ConnectionState::Authenticated) => {
                        warn!(address = %address, "Device link lost, reconnecting");
                    }
                }
            }
            Err(AgentError::Connect(ConnectError::Cancelled)) => {
                debug!("Connect attempt cancelled");
                if token.is_cancelled() {
                    break;
                }
            }
            Err(err) if err.is_retryable() => {
                retry_count += 1;
                warn!(error = %err, attempt = retry_count, "Connect attempt failed");
            }
            Err(err) => {
                error!(error = %err, "Connect failed and needs driver action, supervisor stopping");
                break;
            }
        }

        let Some(delay) = backoff.next_backoff() else {
            error!("Backoff exhausted");
            break;
        };
        debug!(?delay, attempt = retry_count, "Waiting before reconnect");

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!("Connect supervisor stopped");
}

/// One resolve-and-connect pass. Returns the connected address.
async fn connect_once(
    manager: &ConnectionManager,
    config: &SupervisorConfig,
) -> AgentResult<String> {
    let address = match &config.address {
        Some(address) => address.clone(),
        None => {
            let filter = ScanFilter::with_prefixes(config.name_prefixes.iter().cloned());
            let scan = manager.scan(config.scan_duration, filter).await?;
            let found = scan.finish().await;
            let first = found.into_iter().next().ok_or(AgentError::NoDeviceFound)?;
            info!(address = %first.address, name = ?first.display_name, "Found ELD");
            first.address
        }
    };

    manager
        .connect(&address, &config.imei, config.passcode.as_deref())
        .await?;
    Ok(address)
}
