//! # Connection Manager
//!
//! Owns the single device connection: scan sessions, connect attempts and
//! the telemetry pump that runs once a device is authenticated.
//!
//! ## Connect Attempt
//! ```text
//! connect(address, imei, passcode)
//!   │
//!   ├─ begin_attempt ── register session, supersede previous attempt (Cancelled)
//!   └─ spawn driver ─── runs to completion even if the caller goes away
//!
//! driver
//!   ├─ release ──────── old link down, its Disconnected drained
//!   ├─ subscribe ────── before any command, so no signal is missed
//!   ├─ link.connect ─── bounded by the auth timeout
//!   │
//!   ├─ spawn listener ─┐                        ┌─ spawn deadline
//!   │   auth-passed ──►│ check_password_enable  │   sleep(auth_timeout)
//!   │   is_set=false ─►│ resolve(Ok)            │   resolve(Timeout)
//!   │   is_set=true ──►│ validate_password      │
//!   │   verify ok ────►│ resolve(Ok)            │
//!   │   verify bad ───►│ resolve(PasscodeIncorrect)
//!   │   disconnected ─►│ resolve(Disconnected)  │
//!   │                  └───────────┬────────────┘
//!   │                              ▼
//!   ├─ await outcome ◄── AttemptContext (first writer wins, token cancelled)
//!   ├─ join both tasks ─ listener hands its subscription over on success
//!   └─ finish ───────── Authenticated: start pump │ failure: tear link down
//! ```
//!
//! The manager is an explicitly constructed value. Tests build as many
//! independent instances as they like.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use eld_core::{TelemetryRecord, DEFAULT_AUTH_TIMEOUT_SECS};

use crate::attempt::AttemptContext;
use crate::error::{ConnectError, ConnectResult, LinkError, LinkResult};
use crate::events::{LinkEvent, Subscription};
use crate::link::{DeviceLink, ScanFilter};
use crate::scan::ScanSession;
use crate::session::{ConnectionSession, ConnectionState};
use crate::telemetry::{run_pump, PumpExit};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Deadline for the authentication sequence. Also bounds link
    /// establishment.
    pub auth_timeout: Duration,

    /// Passed through to the vendor `connect` call.
    pub need_pair: bool,

    /// How long a superseding attempt waits for the previous link's
    /// `Disconnected` before subscribing.
    pub release_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        ConnectConfig {
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            need_pair: false,
            release_timeout: Duration::from_secs(2),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct PumpHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Everything a freshly registered attempt inherits from its predecessor.
struct AttemptStart {
    attempt: Arc<AttemptContext>,
    outcome_rx: oneshot::Receiver<ConnectResult<()>>,
    old_pump: Option<PumpHandle>,
    release_link: bool,
}

#[derive(Default)]
struct Inner {
    next_attempt_id: u64,
    session: Option<ConnectionSession>,
    attempt: Option<Arc<AttemptContext>>,
    connected: Option<String>,
    pump: Option<PumpHandle>,
}

struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the session of `attempt_id` forward. Stale attempts are ignored.
    fn advance(&self, attempt_id: u64, state: ConnectionState) {
        let mut inner = self.lock();
        if let Some(session) = inner.session.as_mut() {
            if session.attempt_id == attempt_id {
                session.state = state;
                self.state_tx.send_replace(state);
                debug!(attempt = attempt_id, state = %state, "Connection state");
            }
        }
    }

    fn start_auth_wait(&self, attempt_id: u64, timeout: Duration) {
        {
            let mut inner = self.lock();
            if let Some(session) = inner.session.as_mut() {
                if session.attempt_id == attempt_id {
                    session.auth_deadline = chrono::Duration::from_std(timeout)
                        .ok()
                        .map(|d| Utc::now() + d);
                }
            }
        }
        self.advance(attempt_id, ConnectionState::AwaitingAuthentication);
    }

    fn link_lost(&self, address: &str) {
        let mut inner = self.lock();
        if inner.connected.as_deref() == Some(address) {
            inner.connected = None;
            inner.pump = None;
            self.state_tx.send_replace(ConnectionState::Idle);
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Drives one device connection at a time.
///
/// ## Usage
/// ```rust,ignore
/// let (tx, rx) = mpsc::channel(256);
/// let manager = ConnectionManager::new(link, ConnectConfig::default())
///     .with_telemetry_sink(tx);
///
/// manager.connect("C4:A8:28:43:14:9A", "123456789012345", Some("12345678")).await?;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    link: Arc<dyn DeviceLink>,
    config: ConnectConfig,
    shared: Arc<Shared>,
    telemetry: Option<mpsc::Sender<TelemetryRecord>>,
}

impl ConnectionManager {
    pub fn new(link: Arc<dyn DeviceLink>, config: ConnectConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        ConnectionManager {
            link,
            config,
            shared: Arc::new(Shared {
                state_tx,
                inner: Mutex::new(Inner::default()),
            }),
            telemetry: None,
        }
    }

    /// Where decoded telemetry goes while authenticated.
    pub fn with_telemetry_sink(mut self, sink: mpsc::Sender<TelemetryRecord>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// The in-flight attempt, if any.
    pub fn session(&self) -> Option<ConnectionSession> {
        self.shared.lock().session.clone()
    }

    /// Address of the authenticated device, if any.
    pub fn connected_device(&self) -> Option<String> {
        self.shared.lock().connected.clone()
    }

    pub fn link(&self) -> &Arc<dyn DeviceLink> {
        &self.link
    }

    // =========================================================================
    // Scan
    // =========================================================================

    /// Starts a bounded discovery session.
    ///
    /// Refused while a connect attempt is in flight.
    pub async fn scan(&self, duration: Duration, filter: ScanFilter) -> LinkResult<ScanSession> {
        let entered = {
            let inner = self.shared.lock();
            if inner.attempt.is_some() {
                return Err(LinkError::CommandFailed {
                    command: "scan",
                    reason: "connect attempt in flight".into(),
                });
            }
            let idle = inner.connected.is_none();
            if idle {
                self.shared.state_tx.send_replace(ConnectionState::Scanning);
            }
            idle
        };

        info!(duration_secs = duration.as_secs(), prefixes = ?filter.name_prefixes, "Starting scan");

        let shared = Arc::clone(&self.shared);
        let on_finish = Box::new(move || {
            if entered {
                shared.state_tx.send_if_modified(|state| {
                    if *state == ConnectionState::Scanning {
                        *state = ConnectionState::Idle;
                        true
                    } else {
                        false
                    }
                });
            }
        });

        ScanSession::start(Arc::clone(&self.link), duration, filter, on_finish).await
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// Connects and authenticates.
    ///
    /// Resolves only after the device is fully authenticated, or with the
    /// first terminal failure. Never retries.
    ///
    /// The attempt runs on its own task. Dropping this future does not
    /// abandon it: the deadline still resolves the attempt and the session
    /// is cleared either way.
    ///
    /// ## Errors
    /// * `AlreadyConnecting` - an attempt for `address` is in flight
    /// * `PasscodeIncorrect` - link has been disconnected
    /// * `Timeout` - no terminal signal within `auth_timeout`
    /// * `Disconnected` - link dropped before authentication
    /// * `Cancelled` - superseded by another connect or by `disconnect()`
    pub async fn connect(
        &self,
        address: &str,
        imei: &str,
        passcode: Option<&str>,
    ) -> ConnectResult<()> {
        let Some(start) = self.begin_attempt(address, imei)? else {
            debug!(address = %address, "Already authenticated");
            return Ok(());
        };

        let driver = tokio::spawn(self.clone().drive(
            start,
            address.to_string(),
            imei.to_string(),
            passcode.map(String::from),
        ));

        match driver.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Connect attempt task failed");
                Err(ConnectError::Cancelled)
            }
        }
    }

    /// Registers a new attempt, superseding whatever came before.
    ///
    /// Returns `None` when `address` is already authenticated.
    fn begin_attempt(&self, address: &str, imei: &str) -> ConnectResult<Option<AttemptStart>> {
        let mut inner = self.shared.lock();

        if let Some(session) = &inner.session {
            if session.device_address == address {
                return Err(ConnectError::AlreadyConnecting(address.to_string()));
            }
        }
        if inner.connected.as_deref() == Some(address) {
            return Ok(None);
        }

        inner.next_attempt_id += 1;
        let id = inner.next_attempt_id;
        let (attempt, outcome_rx) = AttemptContext::new(id);
        let attempt = Arc::new(attempt);

        let superseded = inner.attempt.replace(Arc::clone(&attempt));
        let old_pump = inner.pump.take();
        let was_connected = inner.connected.take();
        inner.session = Some(ConnectionSession::new(id, address, imei));
        self.shared.state_tx.send_replace(ConnectionState::Connecting);
        drop(inner);

        if let Some(previous) = &superseded {
            if previous.cancel() {
                info!(previous = previous.id(), "Superseded in-flight connect attempt");
            }
        }

        Ok(Some(AttemptStart {
            attempt,
            outcome_rx,
            old_pump,
            release_link: superseded.is_some() || was_connected.is_some(),
        }))
    }

    /// Runs one attempt to completion on its own task.
    async fn drive(
        self,
        start: AttemptStart,
        address: String,
        imei: String,
        passcode: Option<String>,
    ) -> ConnectResult<()> {
        let AttemptStart {
            attempt,
            outcome_rx,
            old_pump,
            release_link,
        } = start;
        let timeout = self.config.auth_timeout;

        if let Some(pump) = old_pump {
            pump.token.cancel();
            let _ = pump.task.await;
        }
        if release_link {
            self.release_previous_link(&attempt).await;
        }

        info!(address = %address, attempt = attempt.id(), "Connecting");

        let events = self.link.events().subscribe();

        let established = tokio::select! {
            biased;
            _ = attempt.cancelled() => Err(ConnectError::Cancelled),
            result = tokio::time::timeout(
                timeout,
                self.link.connect(&address, &imei, self.config.need_pair),
            ) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(ConnectError::from_link(&address, err)),
                Err(_) => Err(ConnectError::Timeout { after: timeout }),
            },
        };

        let mut pump_events = None;
        match established {
            Err(err) => {
                drop(events);
                attempt.resolve(Err(err));
            }
            Ok(()) => {
                self.shared.start_auth_wait(attempt.id(), timeout);

                let listener = tokio::spawn(listen(
                    Arc::clone(&attempt),
                    events,
                    Arc::clone(&self.link),
                    Arc::clone(&self.shared),
                    address.clone(),
                    passcode,
                ));
                let deadline = tokio::spawn(run_deadline(Arc::clone(&attempt), timeout));

                match listener.await {
                    Ok(events) => pump_events = events,
                    Err(err) => {
                        warn!(error = %err, "Auth listener failed");
                        attempt.resolve(Err(ConnectError::Cancelled));
                    }
                }
                if let Err(err) = deadline.await {
                    warn!(error = %err, "Auth deadline task failed");
                }
            }
        }

        let outcome = outcome_rx.await.unwrap_or(Err(ConnectError::Cancelled));
        self.finish_attempt(&attempt, &address, &outcome, pump_events).await;
        outcome
    }

    /// Disconnects the link left behind by a superseded attempt or device and
    /// waits for its `Disconnected` so it cannot reach the new attempt.
    async fn release_previous_link(&self, attempt: &AttemptContext) {
        let mut events = self.link.events().subscribe();

        if let Err(err) = self.link.disconnect().await {
            warn!(error = %err, "Failed to release previous link");
            return;
        }

        let drained = async {
            while let Some(event) = events.recv().await {
                if event == LinkEvent::Disconnected {
                    return true;
                }
            }
            false
        };

        tokio::select! {
            biased;
            _ = attempt.cancelled() => {}
            result = tokio::time::timeout(self.config.release_timeout, drained) => {
                if result.is_err() {
                    debug!(
                        timeout_ms = self.config.release_timeout.as_millis() as u64,
                        "Previous link released without a disconnect signal"
                    );
                }
            }
        }
    }

    async fn finish_attempt(
        &self,
        attempt: &AttemptContext,
        address: &str,
        outcome: &ConnectResult<()>,
        pump_events: Option<Subscription>,
    ) {
        let owned = {
            let mut inner = self.shared.lock();
            let owned = inner
                .attempt
                .as_ref()
                .is_some_and(|current| current.id() == attempt.id());

            if owned {
                inner.attempt = None;
                inner.session = None;
                let state = match outcome {
                    Ok(()) => {
                        inner.connected = Some(address.to_string());
                        ConnectionState::Authenticated
                    }
                    Err(ConnectError::Timeout { .. }) => ConnectionState::TimedOut,
                    Err(_) => ConnectionState::Failed,
                };
                self.shared.state_tx.send_replace(state);
            }
            owned
        };

        // Superseded or disconnected: whoever cancelled owns the link now.
        if !owned {
            return;
        }

        match outcome {
            Ok(()) => {
                info!(address = %address, attempt = attempt.id(), "Device authenticated");
                // The attempt's own subscription carries over, so frames sent
                // right after authentication are kept.
                let events = pump_events.unwrap_or_else(|| self.link.events().subscribe());
                self.start_pump(events, address);
            }
            Err(err) => {
                warn!(address = %address, attempt = attempt.id(), error = %err, "Connect attempt failed");
                if err.requires_teardown() {
                    if let Err(link_err) = self.link.disconnect().await {
                        warn!(error = %link_err, "Teardown after failed attempt failed");
                    }
                }
            }
        }
    }

    fn start_pump(&self, events: Subscription, address: &str) {
        let token = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let origin = address.to_string();
        let sink = self.telemetry.clone();
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            if run_pump(events, task_token, origin.clone(), sink).await == PumpExit::LinkLost {
                shared.link_lost(&origin);
            }
        });

        self.shared.lock().pump = Some(PumpHandle { token, task });
    }

    // =========================================================================
    // Disconnect / Send
    // =========================================================================

    /// Tears everything down. Idempotent; safe in any state.
    ///
    /// An in-flight attempt resolves with [`ConnectError::Cancelled`].
    pub async fn disconnect(&self) {
        let (attempt, pump) = {
            let mut inner = self.shared.lock();
            inner.session = None;
            inner.connected = None;
            self.shared.state_tx.send_replace(ConnectionState::Idle);
            (inner.attempt.take(), inner.pump.take())
        };

        if let Some(attempt) = attempt {
            if attempt.cancel() {
                info!(attempt = attempt.id(), "Cancelled in-flight connect attempt");
            }
        }
        if let Some(pump) = pump {
            pump.token.cancel();
            let _ = pump.task.await;
        }
        if let Err(err) = self.link.disconnect().await {
            warn!(error = %err, "Link disconnect failed");
        }
    }

    /// Writes raw bytes to the authenticated device.
    pub async fn send(&self, data: &[u8]) -> LinkResult<()> {
        if self.connected_device().is_none() {
            return Err(LinkError::NotConnected);
        }
        self.link.send(data).await
    }
}

// =============================================================================
// Attempt Tasks
// =============================================================================

/// Event-driven authentication sequence for one attempt.
///
/// Returns the subscription when it authenticated the device, so the pump
/// picks up exactly where the attempt stopped listening.
async fn listen(
    attempt: Arc<AttemptContext>,
    mut events: Subscription,
    link: Arc<dyn DeviceLink>,
    shared: Arc<Shared>,
    address: String,
    passcode: Option<String>,
) -> Option<Subscription> {
    let id = attempt.id();
    let mut phase = ConnectionState::AwaitingAuthentication;

    loop {
        let event = tokio::select! {
            biased;
            _ = attempt.cancelled() => return None,
            event = events.recv() => event,
        };

        let Some(event) = event else {
            attempt.resolve(Err(ConnectError::Disconnected));
            continue;
        };

        match (phase, event) {
            (_, LinkEvent::Disconnected) => {
                attempt.resolve(Err(ConnectError::Disconnected));
            }
            (_, LinkEvent::ConnectFailure { status, message }) => {
                attempt.resolve(Err(ConnectError::DeviceUnreachable {
                    address: address.clone(),
                    reason: format!("status {status}: {message}"),
                }));
            }
            (_, LinkEvent::Connected) => {
                debug!(attempt = id, "Link established");
            }
            (ConnectionState::AwaitingAuthentication, LinkEvent::AuthenticationPassed) => {
                phase = ConnectionState::CheckingPasswordPolicy;
                shared.advance(id, phase);
                let sent = tokio::select! {
                    biased;
                    _ = attempt.cancelled() => return None,
                    sent = link.check_password_enable() => sent,
                };
                if let Err(err) = sent {
                    attempt.resolve(Err(ConnectError::AuthenticationFailed(err.to_string())));
                }
            }
            (
                ConnectionState::CheckingPasswordPolicy,
                LinkEvent::PasswordStateChecked { is_set: false },
            ) => {
                if attempt.resolve(Ok(())) {
                    return Some(events);
                }
            }
            (
                ConnectionState::CheckingPasswordPolicy,
                LinkEvent::PasswordStateChecked { is_set: true },
            ) => match passcode.as_deref() {
                None => {
                    attempt.resolve(Err(ConnectError::PasscodeRequired));
                }
                Some(code) => {
                    phase = ConnectionState::AwaitingPasswordVerification;
                    shared.advance(id, phase);
                    let sent = tokio::select! {
                        biased;
                        _ = attempt.cancelled() => return None,
                        sent = link.validate_password(code) => sent,
                    };
                    if let Err(err) = sent {
                        attempt.resolve(Err(ConnectError::AuthenticationFailed(err.to_string())));
                    }
                }
            },
            (
                ConnectionState::AwaitingPasswordVerification,
                LinkEvent::PasswordVerifyResult { success: true },
            ) => {
                if attempt.resolve(Ok(())) {
                    return Some(events);
                }
            }
            (
                ConnectionState::AwaitingPasswordVerification,
                LinkEvent::PasswordVerifyResult { success: false },
            ) => {
                attempt.resolve(Err(ConnectError::PasscodeIncorrect));
            }
            (current, other) => {
                debug!(attempt = id, phase = %current, event = ?other, "Ignoring out-of-phase link event");
            }
        }
    }
}

/// Deadline timer tied 1:1 to an attempt.
async fn run_deadline(attempt: Arc<AttemptContext>, after: Duration) {
    tokio::select! {
        _ = attempt.cancelled() => {}
        _ = tokio::time::sleep(after) => {
            if attempt.resolve(Err(ConnectError::Timeout { after })) {
                warn!(attempt = attempt.id(), timeout_secs = after.as_secs(), "Authentication deadline expired");
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockLink, Script};
    use eld_core::{packet, DutyStatus, TelemetrySample};

    const ADDR: &str = "C4:A8:28:43:14:9A";
    const OTHER: &str = "00:1A:7D:DA:71:13";
    const IMEI: &str = "123456789012345";
    const PASSCODE: &str = "12345678";

    fn setup(script: Script) -> (ConnectionManager, Arc<MockLink>) {
        let link = Arc::new(MockLink::new(script));
        let manager = ConnectionManager::new(link.clone(), ConnectConfig::default());
        (manager, link)
    }

    async fn wait_for_state(manager: &ConnectionManager, target: ConnectionState) {
        let mut rx = manager.watch_state();
        rx.wait_for(|state| *state == target).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_without_password_policy() {
        let (manager, link) = setup(Script::default());

        manager.connect(ADDR, IMEI, None).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Authenticated);
        assert_eq!(manager.connected_device().as_deref(), Some(ADDR));
        assert!(manager.session().is_none());
        assert_eq!(link.count(&Call::CheckPasswordEnable), 1);
        assert!(!link
            .calls()
            .iter()
            .any(|c| matches!(c, Call::ValidatePassword(_))));
        // Only the telemetry pump is still listening.
        assert_eq!(link.events().listener_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_with_correct_passcode() {
        let (manager, link) = setup(Script::with_password(PASSCODE));

        manager.connect(ADDR, IMEI, Some(PASSCODE)).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Authenticated);
        assert_eq!(link.count(&Call::ValidatePassword(PASSCODE.into())), 1);
        assert_eq!(link.count(&Call::Disconnect), 0);
        assert_eq!(
            link.calls()[0],
            Call::Connect {
                address: ADDR.into(),
                need_pair: false
            }
        );
    }

    #[tokio::test]
    async fn test_incorrect_passcode_disconnects_link() {
        let (manager, link) = setup(Script::with_password(PASSCODE));

        let err = manager.connect(ADDR, IMEI, Some("00000000")).await.unwrap_err();

        assert_eq!(err, ConnectError::PasscodeIncorrect);
        assert!(err.is_user_visible());
        assert_eq!(link.count(&Call::Disconnect), 1);
        assert_eq!(link.events().listener_count(), 0);
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(manager.connected_device().is_none());
    }

    #[tokio::test]
    async fn test_missing_passcode_fails() {
        let (manager, link) = setup(Script::with_password(PASSCODE));

        let err = manager.connect(ADDR, IMEI, None).await.unwrap_err();

        assert_eq!(err, ConnectError::PasscodeRequired);
        assert_eq!(link.count(&Call::Disconnect), 1);
        assert_eq!(link.events().listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out() {
        let (manager, link) = setup(Script::silent());
        let started = tokio::time::Instant::now();

        let err = manager.connect(ADDR, IMEI, None).await.unwrap_err();

        assert_eq!(
            err,
            ConnectError::Timeout {
                after: Duration::from_secs(30)
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(manager.state(), ConnectionState::TimedOut);
        assert_eq!(link.count(&Call::Disconnect), 1);
        assert_eq!(link.events().listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_password_check_times_out() {
        let script = Script {
            answer_password_check: false,
            ..Script::default()
        };
        let (manager, link) = setup(script);

        let err = manager.connect(ADDR, IMEI, None).await.unwrap_err();

        assert!(matches!(err, ConnectError::Timeout { .. }));
        assert_eq!(link.count(&Call::CheckPasswordEnable), 1);
        assert_eq!(link.events().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_signal_during_auth_fails_attempt() {
        let (manager, link) = setup(Script::silent());

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(ADDR, IMEI, None).await })
        };
        wait_for_state(&manager, ConnectionState::AwaitingAuthentication).await;
        assert!(manager.session().unwrap().auth_deadline.is_some());

        link.emit(LinkEvent::Disconnected);

        assert_eq!(task.await.unwrap(), Err(ConnectError::Disconnected));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(link.events().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_surfaces() {
        let script = Script {
            connect_error: Some(LinkError::PermissionDenied("bluetooth off".into())),
            ..Script::default()
        };
        let (manager, link) = setup(script);

        let err = manager.connect(ADDR, IMEI, None).await.unwrap_err();

        assert_eq!(err, ConnectError::PermissionDenied("bluetooth off".into()));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(link.events().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_event_is_unreachable() {
        let script = Script {
            on_connect: vec![LinkEvent::ConnectFailure {
                status: 133,
                message: "GATT error".into(),
            }],
            ..Script::default()
        };
        let (manager, link) = setup(script);

        let err = manager.connect(ADDR, IMEI, None).await.unwrap_err();

        assert!(matches!(err, ConnectError::DeviceUnreachable { ref reason, .. } if reason.contains("133")));
        assert_eq!(link.events().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (manager, link) = setup(Script::default());

        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Idle);

        manager.connect(ADDR, IMEI, None).await.unwrap();
        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(manager.connected_device().is_none());
        assert_eq!(link.events().listener_count(), 0);
        assert_eq!(link.count(&Call::Disconnect), 4);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_in_flight_attempt() {
        let (manager, link) = setup(Script::silent());

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(ADDR, IMEI, None).await })
        };
        wait_for_state(&manager, ConnectionState::AwaitingAuthentication).await;

        manager.disconnect().await;

        assert_eq!(task.await.unwrap(), Err(ConnectError::Cancelled));
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(link.events().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_second_connect_to_same_device_rejected() {
        let (manager, _link) = setup(Script::silent());

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(ADDR, IMEI, None).await })
        };
        wait_for_state(&manager, ConnectionState::AwaitingAuthentication).await;

        let err = manager.connect(ADDR, IMEI, None).await.unwrap_err();
        assert_eq!(err, ConnectError::AlreadyConnecting(ADDR.into()));

        manager.disconnect().await;
        assert_eq!(task.await.unwrap(), Err(ConnectError::Cancelled));
    }

    #[tokio::test]
    async fn test_connect_to_other_device_supersedes() {
        let (manager, link) = setup(Script::silent());

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(ADDR, IMEI, None).await })
        };
        wait_for_state(&manager, ConnectionState::AwaitingAuthentication).await;

        link.set_script(Script::default());
        manager.connect(OTHER, IMEI, None).await.unwrap();

        assert_eq!(first.await.unwrap(), Err(ConnectError::Cancelled));
        assert_eq!(manager.connected_device().as_deref(), Some(OTHER));
        assert_eq!(manager.state(), ConnectionState::Authenticated);
        assert_eq!(link.events().listener_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_to_authenticated_device_is_noop() {
        let (manager, link) = setup(Script::default());

        manager.connect(ADDR, IMEI, None).await.unwrap();
        manager.connect(ADDR, IMEI, None).await.unwrap();

        let connects = link
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Connect { .. }))
            .count();
        assert_eq!(connects, 1);
    }

    #[tokio::test]
    async fn test_notify_frames_reach_telemetry_sink() {
        let link = Arc::new(MockLink::new(Script::default()));
        let (tx, mut rx) = mpsc::channel(8);
        let manager =
            ConnectionManager::new(link.clone(), ConnectConfig::default()).with_telemetry_sink(tx);

        manager.connect(ADDR, IMEI, None).await.unwrap();

        let sample = TelemetrySample {
            speed_mph: 55.0,
            rpm: 1400,
            fuel_level_pct: 80,
            odometer_miles: 125_010,
            duty_status: DutyStatus::Driving,
            location: None,
        };
        link.emit(LinkEvent::NotifyReceived(packet::encode(&sample)));
        link.emit(LinkEvent::NotifyReceived(vec![0x01, 0x02]));

        let decoded = rx.recv().await.unwrap();
        assert_eq!(decoded.origin, ADDR);
        assert_eq!(decoded.sample(), Some(sample));

        let raw = rx.recv().await.unwrap();
        assert_eq!(raw.payload["raw"], "0102");
    }

    #[tokio::test]
    async fn test_link_loss_after_auth_returns_to_idle() {
        let (manager, link) = setup(Script::default());
        manager.connect(ADDR, IMEI, None).await.unwrap();

        link.emit(LinkEvent::Disconnected);
        wait_for_state(&manager, ConnectionState::Idle).await;

        assert!(manager.connected_device().is_none());
        assert_eq!(link.events().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_send_requires_authenticated_device() {
        let (manager, link) = setup(Script::default());

        assert_eq!(manager.send(&[0x01]).await, Err(LinkError::NotConnected));

        manager.connect(ADDR, IMEI, None).await.unwrap();
        manager.send(&[0x01]).await.unwrap();
        assert_eq!(link.count(&Call::Send(vec![0x01])), 1);
    }

    #[tokio::test]
    async fn test_independent_managers_do_not_share_state() {
        let (a, _link_a) = setup(Script::default());
        let (b, _link_b) = setup(Script::silent());

        a.connect(ADDR, IMEI, None).await.unwrap();

        assert_eq!(a.state(), ConnectionState::Authenticated);
        assert_eq!(b.state(), ConnectionState::Idle);
        assert!(b.connected_device().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_password_check_is_bounded_by_deadline() {
        let script = Script {
            hang_password_check: true,
            ..Script::default()
        };
        let (manager, link) = setup(script);

        let result =
            tokio::time::timeout(Duration::from_secs(120), manager.connect(ADDR, IMEI, None))
                .await
                .expect("connect returns once the deadline fires");

        assert_eq!(
            result,
            Err(ConnectError::Timeout {
                after: Duration::from_secs(30)
            })
        );
        assert_eq!(manager.state(), ConnectionState::TimedOut);
        assert!(manager.session().is_none());
        assert_eq!(link.events().listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_connect_still_clears_session() {
        let (manager, link) = setup(Script::silent());

        let dropped =
            tokio::time::timeout(Duration::from_millis(10), manager.connect(ADDR, IMEI, None)).await;
        assert!(dropped.is_err());
        assert!(manager.session().is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(manager.session().is_none());
        assert_eq!(manager.state(), ConnectionState::TimedOut);
        assert_eq!(link.events().listener_count(), 0);

        link.set_script(Script::default());
        manager.connect(ADDR, IMEI, None).await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Authenticated);
    }

    #[tokio::test]
    async fn test_frame_sent_with_auth_answer_is_kept() {
        let sample = TelemetrySample {
            speed_mph: 0.0,
            rpm: 700,
            fuel_level_pct: 64,
            odometer_miles: 98_120,
            duty_status: DutyStatus::OnDutyNotDriving,
            location: None,
        };
        let script = Script {
            after_password_check: vec![LinkEvent::NotifyReceived(packet::encode(&sample))],
            ..Script::default()
        };
        let link = Arc::new(MockLink::new(script));
        let (tx, mut rx) = mpsc::channel(8);
        let manager =
            ConnectionManager::new(link.clone(), ConnectConfig::default()).with_telemetry_sink(tx);

        manager.connect(ADDR, IMEI, None).await.unwrap();

        let record = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("first frame reaches the sink")
            .unwrap();
        assert_eq!(record.sample(), Some(sample));
        assert_eq!(link.events().listener_count(), 1);
    }

    #[tokio::test]
    async fn test_late_disconnect_of_previous_device_is_ignored() {
        let script = Script {
            disconnect_delay: Some(Duration::from_millis(5)),
            ..Script::default()
        };
        let (manager, link) = setup(script);

        manager.connect(ADDR, IMEI, None).await.unwrap();
        manager.connect(OTHER, IMEI, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(manager.state(), ConnectionState::Authenticated);
        assert_eq!(manager.connected_device().as_deref(), Some(OTHER));
        assert_eq!(link.count(&Call::Disconnect), 1);
        assert_eq!(link.events().listener_count(), 1);
    }
}
