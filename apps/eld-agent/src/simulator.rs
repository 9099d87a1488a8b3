//! # Simulated ELD
//!
//! A [`DeviceLink`] that behaves like a PT30 unit on the bench. It
//! advertises itself, answers the authentication sequence, enforces a
//! passcode and streams telemetry frames while the link is up.
//!
//! ## Drive Cycle
//! ```text
//! speed (mph)
//!  55 ┤    ┌──────────────────────┐
//!     │   ╱                        ╲
//!   0 ┼──╱                          ╲──────────────────────────┐ repeat
//!     0  30s                     300s 330s                   750s
//!        accelerate   cruise       brake   parked (duty stays Driving)
//! ```
//!
//! The parked stretch is longer than the default inactivity window, so a
//! long-running agent sees the inactivity prompt once per cycle.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use eld_core::{packet, DeviceIdentity, DutyStatus, TelemetrySample};
use eld_device::{DeviceLink, EventBus, LinkError, LinkEvent, LinkResult, ScanFilter};

pub const SIM_ADDRESS: &str = "C4:A8:28:43:14:9A";
pub const SIM_NAME: &str = "PT30-ELD";
pub const SIM_PASSCODE: &str = "12345678";

const CRUISE_MPH: f64 = 55.0;
const RAMP_TICKS: u64 = 30;
const BRAKE_AT: u64 = 300;
const CYCLE_TICKS: u64 = 750;
const IDLE_RPM: u16 = 700;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub address: String,
    pub name: String,
    pub signal: i16,
    /// `None` disables the password policy.
    pub passcode: Option<String>,
    pub frame_interval: Duration,
    pub start_odometer_miles: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            address: SIM_ADDRESS.to_string(),
            name: SIM_NAME.to_string(),
            signal: -58,
            passcode: Some(SIM_PASSCODE.to_string()),
            frame_interval: Duration::from_secs(1),
            start_odometer_miles: 125_000,
        }
    }
}

// =============================================================================
// Drive Cycle
// =============================================================================

#[derive(Debug)]
struct DriveCycle {
    tick: u64,
    odometer: f64,
    interval_secs: f64,
}

impl DriveCycle {
    fn new(config: &SimulatorConfig) -> Self {
        DriveCycle {
            tick: 0,
            odometer: f64::from(config.start_odometer_miles),
            interval_secs: config.frame_interval.as_secs_f64(),
        }
    }

    fn next_sample(&mut self) -> TelemetrySample {
        let speed = speed_at(self.tick);
        self.tick += 1;
        self.odometer += speed * self.interval_secs / 3600.0;

        let rpm = if speed > 0.0 {
            IDLE_RPM + (speed * 25.0) as u16
        } else {
            IDLE_RPM
        };
        // One percent of fuel per completed cycle, floored at 5%.
        let burned = (self.tick / CYCLE_TICKS).min(75) as u8;

        TelemetrySample {
            speed_mph: speed,
            rpm,
            fuel_level_pct: 80 - burned,
            odometer_miles: self.odometer as u32,
            duty_status: DutyStatus::Driving,
            location: None,
        }
    }
}

fn speed_at(tick: u64) -> f64 {
    let t = tick % CYCLE_TICKS;
    let step = CRUISE_MPH / RAMP_TICKS as f64;
    if t < RAMP_TICKS {
        t as f64 * step
    } else if t < BRAKE_AT {
        CRUISE_MPH
    } else if t < BRAKE_AT + RAMP_TICKS {
        (BRAKE_AT + RAMP_TICKS - t) as f64 * step
    } else {
        0.0
    }
}

// =============================================================================
// Simulated Link
// =============================================================================

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    stream: Option<CancellationToken>,
}

/// In-process stand-in for the vendor radio SDK.
#[derive(Debug)]
pub struct SimulatedLink {
    config: SimulatorConfig,
    bus: EventBus,
    state: Mutex<LinkState>,
    cycle: Arc<Mutex<DriveCycle>>,
}

impl SimulatedLink {
    pub fn new(config: SimulatorConfig) -> Self {
        let cycle = Arc::new(Mutex::new(DriveCycle::new(&config)));
        SimulatedLink {
            config,
            bus: EventBus::default(),
            state: Mutex::new(LinkState::default()),
            cycle,
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            address: self.config.address.clone(),
            display_name: Some(self.config.name.clone()),
            last_seen_signal: Some(self.config.signal),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Drops the link as if the truck drove out of radio range.
    pub fn simulate_link_loss(&self) {
        if self.close() {
            info!(address = %self.config.address, "Simulated link loss");
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops streaming and reports the drop. Returns false if already down.
    fn close(&self) -> bool {
        let (was_connected, stream) = {
            let mut state = self.lock();
            let was = state.connected;
            state.connected = false;
            (was, state.stream.take())
        };
        if let Some(token) = stream {
            token.cancel();
        }
        if was_connected {
            self.bus.publish(LinkEvent::Disconnected);
        }
        was_connected
    }

    fn start_stream(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let bus = self.bus.clone();
        let cycle = Arc::clone(&self.cycle);
        let period = self.config.frame_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let sample = cycle
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .next_sample();
                        bus.publish(LinkEvent::NotifyReceived(packet::encode(&sample)));
                    }
                }
            }
            debug!("Simulated telemetry stream stopped");
        });

        token
    }
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn start_scan(&self, _duration: Duration, _filter: &ScanFilter) -> LinkResult<()> {
        self.bus.publish(LinkEvent::DeviceScanned(self.identity()));
        Ok(())
    }

    async fn stop_scan(&self) -> LinkResult<()> {
        Ok(())
    }

    async fn connect(&self, address: &str, imei: &str, need_pair: bool) -> LinkResult<()> {
        if address != self.config.address {
            return Err(LinkError::Unreachable(format!("no device at {address}")));
        }
        debug!(address = %address, imei = %imei, need_pair, "Simulated connect");

        {
            let mut state = self.lock();
            if let Some(previous) = state.stream.take() {
                previous.cancel();
            }
            state.connected = true;
            state.stream = Some(self.start_stream());
        }

        self.bus.publish(LinkEvent::Connected);
        self.bus.publish(LinkEvent::AuthenticationPassed);
        Ok(())
    }

    async fn disconnect(&self) -> LinkResult<()> {
        self.close();
        Ok(())
    }

    async fn check_password_enable(&self) -> LinkResult<()> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.bus.publish(LinkEvent::PasswordStateChecked {
            is_set: self.config.passcode.is_some(),
        });
        Ok(())
    }

    async fn validate_password(&self, code: &str) -> LinkResult<()> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let success = self.config.passcode.as_deref() == Some(code);
        self.bus.publish(LinkEvent::PasswordVerifyResult { success });
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> LinkResult<()> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        debug!(bytes = data.len(), "Simulated device received command");
        Ok(())
    }

    fn events(&self) -> &EventBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eld_device::{ConnectConfig, ConnectError, ConnectionManager, ConnectionState};
    use tokio::sync::mpsc;

    fn manager(link: Arc<SimulatedLink>) -> ConnectionManager {
        ConnectionManager::new(link, ConnectConfig::default())
    }

    #[test]
    fn test_drive_cycle_profile() {
        assert_eq!(speed_at(0), 0.0);
        assert_eq!(speed_at(100), CRUISE_MPH);
        assert!(speed_at(310) > 0.0 && speed_at(310) < CRUISE_MPH);
        assert_eq!(speed_at(400), 0.0);
        assert_eq!(speed_at(CYCLE_TICKS + 100), CRUISE_MPH);
    }

    #[test]
    fn test_odometer_advances_while_cruising() {
        let mut cycle = DriveCycle::new(&SimulatorConfig::default());
        let mut last = None;
        for _ in 0..300 {
            last = Some(cycle.next_sample());
        }
        let sample = last.unwrap();
        // ~4.3 miles over the first 300s.
        assert_eq!(sample.odometer_miles, 125_004);
        assert_eq!(sample.duty_status, DutyStatus::Driving);
        assert!(sample.rpm > IDLE_RPM);
    }

    #[tokio::test]
    async fn test_connects_with_passcode() {
        let link = Arc::new(SimulatedLink::default());
        let manager = manager(Arc::clone(&link));

        manager
            .connect(SIM_ADDRESS, "123456789012345", Some(SIM_PASSCODE))
            .await
            .unwrap();

        assert_eq!(manager.state(), ConnectionState::Authenticated);
        assert_eq!(manager.connected_device().as_deref(), Some(SIM_ADDRESS));
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn test_wrong_passcode_tears_down() {
        let link = Arc::new(SimulatedLink::default());
        let manager = manager(Arc::clone(&link));

        let result = manager
            .connect(SIM_ADDRESS, "123456789012345", Some("00000000"))
            .await;

        assert_eq!(result, Err(ConnectError::PasscodeIncorrect));
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_unknown_address_is_unreachable() {
        let manager = manager(Arc::new(SimulatedLink::default()));

        let result = manager.connect("00:00:00:00:00:00", "1", None).await;

        assert!(matches!(result, Err(ConnectError::DeviceUnreachable { .. })));
    }

    #[tokio::test]
    async fn test_scan_finds_simulator() {
        let manager = manager(Arc::new(SimulatedLink::default()));

        let scan = manager
            .scan(Duration::from_millis(50), ScanFilter::with_prefixes(["PT30"]))
            .await
            .unwrap();
        let devices = scan.finish().await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, SIM_ADDRESS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_telemetry_after_auth() {
        let link = Arc::new(SimulatedLink::new(SimulatorConfig {
            passcode: None,
            ..SimulatorConfig::default()
        }));
        let (tx, mut rx) = mpsc::channel(16);
        let manager = manager(Arc::clone(&link)).with_telemetry_sink(tx);

        manager.connect(SIM_ADDRESS, "1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let record = rx.recv().await.unwrap();
        let sample = record.sample().unwrap();
        assert_eq!(record.origin, SIM_ADDRESS);
        assert_eq!(sample.duty_status, DutyStatus::Driving);
    }

    #[tokio::test]
    async fn test_link_loss_returns_manager_to_idle() {
        let link = Arc::new(SimulatedLink::new(SimulatorConfig {
            passcode: None,
            ..SimulatorConfig::default()
        }));
        let manager = manager(Arc::clone(&link));
        manager.connect(SIM_ADDRESS, "1", None).await.unwrap();
        let mut state = manager.watch_state();

        link.simulate_link_loss();
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ConnectionState::Idle),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(manager.connected_device().is_none());
    }
}
