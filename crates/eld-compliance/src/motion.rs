//! # Motion Restriction
//!
//! What a driver may do while the vehicle is moving depends on two things:
//! whether it is moving right now, and whether a co-driver was already
//! logged in when the current motion period began.
//!
//! ## Permission Table
//! ```text
//! ┌──────────┬──────────────┬──────────────┬─────────┬─────────┬─────────┐
//! │ vehicle  │ co-driver    │ logged in    │ make    │ switch  │ edit    │
//! │          │ active       │ before motion│ entries │ roles   │ records │
//! ├──────────┼──────────────┼──────────────┼─────────┼─────────┼─────────┤
//! │ stopped  │      -       │      -       │  yes    │  yes    │  yes    │
//! │ moving   │     no       │      -       │  no     │  no     │  no     │
//! │ moving   │     yes      │     yes      │  yes    │  no     │  yes    │
//! │ moving   │     yes      │     no       │  no     │  no     │  no     │
//! └──────────┴──────────────┴──────────────┴─────────┴─────────┴─────────┘
//! ```
//!
//! The "logged in before motion" snapshot is taken on every stopped ─► moving
//! transition and held until the next one, or until the co-driver logs out.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use eld_core::MotionRestrictionState;

use crate::reading::VehicleReading;

// =============================================================================
// Derivation
// =============================================================================

/// Permissions derived from the motion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub can_make_entries: bool,
    pub can_switch_roles: bool,
    pub can_edit_records: bool,
}

impl Permissions {
    const ALL: Permissions = Permissions {
        can_make_entries: true,
        can_switch_roles: true,
        can_edit_records: true,
    };

    const NONE: Permissions = Permissions {
        can_make_entries: false,
        can_switch_roles: false,
        can_edit_records: false,
    };
}

/// Applies the permission table. Role switching is never allowed in motion.
pub fn derive_permissions(
    is_moving: bool,
    co_driver_active: bool,
    logged_in_before_motion: bool,
) -> Permissions {
    match (is_moving, co_driver_active, logged_in_before_motion) {
        (false, _, _) => Permissions::ALL,
        (true, true, true) => Permissions {
            can_make_entries: true,
            can_switch_roles: false,
            can_edit_records: true,
        },
        (true, _, _) => Permissions::NONE,
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Holds motion and co-driver state and keeps the permissions current.
#[derive(Debug, Clone)]
pub struct MotionTracker {
    threshold_mph: f64,
    co_driver_active: bool,
    state: MotionRestrictionState,
}

impl MotionTracker {
    /// `threshold_mph`: speed at or above which the vehicle is moving.
    pub fn new(threshold_mph: f64) -> Self {
        MotionTracker {
            threshold_mph,
            co_driver_active: false,
            state: MotionRestrictionState::default(),
        }
    }

    pub fn state(&self) -> &MotionRestrictionState {
        &self.state
    }

    pub fn is_co_driver_active(&self) -> bool {
        self.co_driver_active
    }

    /// Feeds a speed observed at `at`.
    pub fn update_speed(&mut self, speed_mph: f64, at: DateTime<Utc>) -> &MotionRestrictionState {
        let moving = speed_mph >= self.threshold_mph;

        if moving && !self.state.is_vehicle_in_motion {
            let before = self.co_driver_active
                && self
                    .state
                    .co_driver_authenticated_at
                    .is_some_and(|auth| auth < at);
            self.state.motion_started_at = Some(at);
            self.state.co_driver_logged_in_before_motion = before;
            info!(
                speed_mph,
                co_driver_logged_in_before_motion = before,
                "Vehicle started moving"
            );
        } else if !moving && self.state.is_vehicle_in_motion {
            self.state.motion_started_at = None;
            info!(speed_mph, "Vehicle stopped");
        }

        self.state.is_vehicle_in_motion = moving;
        self.evaluate()
    }

    /// A co-driver authenticated at `at`.
    ///
    /// Logging in mid-motion does not change the current period's snapshot.
    pub fn co_driver_login(&mut self, at: DateTime<Utc>) -> &MotionRestrictionState {
        self.co_driver_active = true;
        self.state.co_driver_authenticated_at = Some(at);
        self.evaluate()
    }

    /// Ends the co-driver session. A later login in the same motion period
    /// starts after the motion did, so the snapshot goes with it.
    pub fn co_driver_logout(&mut self) -> &MotionRestrictionState {
        self.co_driver_active = false;
        self.state.co_driver_authenticated_at = None;
        self.state.co_driver_logged_in_before_motion = false;
        self.evaluate()
    }

    fn evaluate(&mut self) -> &MotionRestrictionState {
        let permissions = derive_permissions(
            self.state.is_vehicle_in_motion,
            self.co_driver_active,
            self.state.co_driver_logged_in_before_motion,
        );
        self.state.can_make_entries = permissions.can_make_entries;
        self.state.can_switch_roles = permissions.can_switch_roles;
        self.state.can_edit_records = permissions.can_edit_records;
        &self.state
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Re-evaluates a [`MotionTracker`] on a fixed interval from the latest
/// vehicle reading and publishes every change.
pub struct MotionRestrictionMonitor {
    tracker: Arc<Mutex<MotionTracker>>,
    state_tx: Arc<watch::Sender<MotionRestrictionState>>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MotionRestrictionMonitor {
    pub fn spawn(
        threshold_mph: f64,
        poll_interval: Duration,
        readings: watch::Receiver<VehicleReading>,
    ) -> Self {
        let tracker = Arc::new(Mutex::new(MotionTracker::new(threshold_mph)));
        let (state_tx, _) = watch::channel(MotionRestrictionState::default());
        let state_tx = Arc::new(state_tx);
        let token = CancellationToken::new();

        let task = tokio::spawn(poll(
            Arc::clone(&tracker),
            Arc::clone(&state_tx),
            readings,
            poll_interval,
            token.clone(),
        ));

        MotionRestrictionMonitor {
            tracker,
            state_tx,
            token,
            task,
        }
    }

    pub fn state(&self) -> MotionRestrictionState {
        self.state_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MotionRestrictionState> {
        self.state_tx.subscribe()
    }

    pub fn co_driver_login(&self) {
        self.apply(|tracker| {
            tracker.co_driver_login(Utc::now());
        });
    }

    pub fn co_driver_logout(&self) {
        self.apply(|tracker| {
            tracker.co_driver_logout();
        });
    }

    fn apply(&self, f: impl FnOnce(&mut MotionTracker)) {
        let state = {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut tracker);
            tracker.state().clone()
        };
        publish(&self.state_tx, state);
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

fn publish(tx: &watch::Sender<MotionRestrictionState>, state: MotionRestrictionState) {
    tx.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        debug!(
            moving = state.is_vehicle_in_motion,
            can_make_entries = state.can_make_entries,
            can_edit_records = state.can_edit_records,
            "Motion restriction changed"
        );
        *current = state;
        true
    });
}

async fn poll(
    tracker: Arc<Mutex<MotionTracker>>,
    state_tx: Arc<watch::Sender<MotionRestrictionState>>,
    readings: watch::Receiver<VehicleReading>,
    poll_interval: Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let speed = readings.borrow().speed_mph;
        let state = {
            let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.update_speed(speed, Utc::now()).clone()
        };
        publish(&state_tx, state);
    }
}
