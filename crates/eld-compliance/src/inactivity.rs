//! # Inactivity Monitor
//!
//! Catches a vehicle left stopped while the duty status still says driving.
//!
//! ```text
//! Watching ──(stopped && driving)──► Stopped ──(inactivity elapsed)──► Prompted
//!                                       ▲                                 │
//!                                       └──────── acknowledge() ──────────┤
//!                                                                         │ prompt timeout
//!                                                                         ▼
//!                                          change_duty_status() ◄──── Switched
//!                                           (spawned, reported as event)
//!
//! moving or not driving, from any phase ──► Watching  (PromptCleared if prompted)
//! ```
//!
//! Acknowledging the prompt restarts the inactivity window. The duty-status
//! call is spawned; its outcome is reported as an event and never blocks
//! the monitor loop.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use eld_core::DutyStatus;

use crate::api::{ComplianceApi, DutyStatusChange};
use crate::reading::VehicleReading;

const EVENT_CAPACITY: usize = 32;

/// Inactivity thresholds.
#[derive(Debug, Clone, Copy)]
pub struct InactivityConfig {
    /// Below this speed the vehicle counts as stopped.
    pub threshold_mph: f64,
    /// Stopped-while-driving time before the prompt.
    pub inactivity: Duration,
    /// Unanswered-prompt time before the automatic switch.
    pub prompt_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        InactivityConfig {
            threshold_mph: eld_core::DEFAULT_MOTION_THRESHOLD_MPH,
            inactivity: Duration::from_secs(300),
            prompt_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Emitted to whoever shows the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InactivityEvent {
    /// Ask the driver whether they are still driving.
    Prompt { stopped_for: Duration },
    /// The condition cleared before the driver answered.
    PromptCleared,
    /// The driver answered; the inactivity window restarts.
    Acknowledged,
    /// Duty status was switched on the driver's behalf.
    AutoSwitched { status: DutyStatus },
    /// The backend refused or could not be reached.
    AutoSwitchFailed { error: String },
}

// =============================================================================
// Tracker
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Watching,
    Stopped { since: Instant },
    Prompted { at: Instant },
    Switched,
}

/// What the monitor must do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Prompt(Duration),
    ClearPrompt,
    AutoSwitch(Duration),
}

#[derive(Debug)]
struct InactivityTracker {
    config: InactivityConfig,
    phase: Phase,
}

impl InactivityTracker {
    fn new(config: InactivityConfig) -> Self {
        InactivityTracker {
            config,
            phase: Phase::Watching,
        }
    }

    fn step(&mut self, now: Instant, reading: &VehicleReading) -> Option<Action> {
        let idle = reading.duty_status == DutyStatus::Driving
            && reading.speed_mph < self.config.threshold_mph;

        if !idle {
            let was_prompted = matches!(self.phase, Phase::Prompted { .. });
            self.phase = Phase::Watching;
            return was_prompted.then_some(Action::ClearPrompt);
        }

        match self.phase {
            Phase::Watching => {
                self.phase = Phase::Stopped { since: now };
                None
            }
            Phase::Stopped { since } => {
                let stopped_for = now.duration_since(since);
                if stopped_for < self.config.inactivity {
                    return None;
                }
                self.phase = Phase::Prompted { at: now };
                Some(Action::Prompt(stopped_for))
            }
            Phase::Prompted { at } => {
                let waited = now.duration_since(at);
                if waited < self.config.prompt_timeout {
                    return None;
                }
                self.phase = Phase::Switched;
                Some(Action::AutoSwitch(self.config.inactivity + waited))
            }
            Phase::Switched => None,
        }
    }

    /// Returns true if a prompt was pending.
    fn acknowledge(&mut self, now: Instant) -> bool {
        if !matches!(self.phase, Phase::Prompted { .. }) {
            return false;
        }
        self.phase = Phase::Stopped { since: now };
        true
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Watches the latest vehicle reading for stopped-while-driving.
pub struct InactivityMonitor {
    events: broadcast::Sender<InactivityEvent>,
    ack_tx: mpsc::UnboundedSender<()>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl InactivityMonitor {
    pub fn spawn(
        config: InactivityConfig,
        readings: watch::Receiver<VehicleReading>,
        api: Arc<dyn ComplianceApi>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let task = tokio::spawn(run(
            InactivityTracker::new(config),
            readings,
            api,
            events.clone(),
            ack_rx,
            token.clone(),
        ));

        InactivityMonitor {
            events,
            ack_tx,
            token,
            task,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InactivityEvent> {
        self.events.subscribe()
    }

    /// The driver answered the prompt.
    pub fn acknowledge(&self) {
        let _ = self.ack_tx.send(());
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

async fn run(
    mut tracker: InactivityTracker,
    readings: watch::Receiver<VehicleReading>,
    api: Arc<dyn ComplianceApi>,
    events: broadcast::Sender<InactivityEvent>,
    mut ack_rx: mpsc::UnboundedReceiver<()>,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(tracker.config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            Some(()) = ack_rx.recv() => {
                if tracker.acknowledge(Instant::now()) {
                    info!("Inactivity prompt acknowledged");
                    let _ = events.send(InactivityEvent::Acknowledged);
                }
            }
            _ = interval.tick() => {
                let reading = readings.borrow().clone();
                match tracker.step(Instant::now(), &reading) {
                    Some(Action::Prompt(stopped_for)) => {
                        info!(stopped_secs = stopped_for.as_secs(), "Stopped while driving, prompting driver");
                        let _ = events.send(InactivityEvent::Prompt { stopped_for });
                    }
                    Some(Action::ClearPrompt) => {
                        let _ = events.send(InactivityEvent::PromptCleared);
                    }
                    Some(Action::AutoSwitch(idle_for)) => {
                        auto_switch(Arc::clone(&api), &reading, idle_for, events.clone());
                    }
                    None => {}
                }
            }
        }
    }
}

fn auto_switch(
    api: Arc<dyn ComplianceApi>,
    reading: &VehicleReading,
    idle_for: Duration,
    events: broadcast::Sender<InactivityEvent>,
) {
    let change = DutyStatusChange {
        status: DutyStatus::OnDutyNotDriving,
        location: reading.location,
        odometer_miles: reading.odometer_miles,
        remark: format!(
            "Automatic switch after {}s stopped without driver response",
            idle_for.as_secs()
        ),
        changed_at: Utc::now(),
    };
    warn!(odometer_miles = change.odometer_miles, "Prompt unanswered, switching duty status");

    tokio::spawn(async move {
        let event = match api.change_duty_status(&change).await {
            Ok(()) => {
                info!(status = %change.status, "Duty status switched");
                InactivityEvent::AutoSwitched {
                    status: change.status,
                }
            }
            Err(err) => {
                error!(error = %err, "Automatic duty status switch failed");
                InactivityEvent::AutoSwitchFailed {
                    error: err.to_string(),
                }
            }
        };
        let _ = events.send(event);
    });
}
