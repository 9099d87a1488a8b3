//! Scripted in-memory link for tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use eld_core::DeviceIdentity;

use crate::error::{LinkError, LinkResult};
use crate::events::{EventBus, LinkEvent};
use crate::link::{DeviceLink, ScanFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    StartScan,
    StopScan,
    Connect { address: String, need_pair: bool },
    Disconnect,
    CheckPasswordEnable,
    ValidatePassword(String),
    Send(Vec<u8>),
}

/// How the scripted device answers commands.
#[derive(Debug, Clone)]
pub(crate) struct Script {
    /// Returned from `connect()` instead of emitting events.
    pub connect_error: Option<LinkError>,
    /// Emitted from `connect()` on success.
    pub on_connect: Vec<LinkEvent>,
    /// `None` answers `is_set = false`. `Some` answers `is_set = true`.
    pub device_password: Option<String>,
    /// When false the password-policy query is never answered.
    pub answer_password_check: bool,
    /// When true `check_password_enable()` never returns.
    pub hang_password_check: bool,
    /// Emitted right after the password-policy answer.
    pub after_password_check: Vec<LinkEvent>,
    /// When set, `Disconnected` arrives this long after `disconnect()` returns.
    pub disconnect_delay: Option<Duration>,
    /// Emitted from `start_scan()`.
    pub scan_results: Vec<DeviceIdentity>,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            connect_error: None,
            on_connect: vec![LinkEvent::Connected, LinkEvent::AuthenticationPassed],
            device_password: None,
            answer_password_check: true,
            hang_password_check: false,
            after_password_check: Vec::new(),
            disconnect_delay: None,
            scan_results: Vec::new(),
        }
    }
}

impl Script {
    /// Link comes up but the device never authenticates.
    pub fn silent() -> Self {
        Script {
            on_connect: vec![LinkEvent::Connected],
            ..Script::default()
        }
    }

    pub fn with_password(code: &str) -> Self {
        Script {
            device_password: Some(code.to_string()),
            ..Script::default()
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockLink {
    bus: EventBus,
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
}

impl MockLink {
    pub fn new(script: Script) -> Self {
        MockLink {
            bus: EventBus::default(),
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    /// Pushes an event as if the device sent it.
    pub fn emit(&self, event: LinkEvent) {
        self.bus.publish(event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn script(&self) -> Script {
        self.script.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceLink for MockLink {
    async fn start_scan(&self, _duration: Duration, _filter: &ScanFilter) -> LinkResult<()> {
        self.record(Call::StartScan);
        for identity in self.script().scan_results {
            self.emit(LinkEvent::DeviceScanned(identity));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> LinkResult<()> {
        self.record(Call::StopScan);
        Ok(())
    }

    async fn connect(&self, address: &str, _imei: &str, need_pair: bool) -> LinkResult<()> {
        self.record(Call::Connect {
            address: address.to_string(),
            need_pair,
        });
        let script = self.script();
        if let Some(err) = script.connect_error {
            return Err(err);
        }
        for event in script.on_connect {
            self.emit(event);
        }
        Ok(())
    }

    async fn disconnect(&self) -> LinkResult<()> {
        self.record(Call::Disconnect);
        match self.script().disconnect_delay {
            Some(delay) => {
                let bus = self.bus.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    bus.publish(LinkEvent::Disconnected);
                });
            }
            None => self.emit(LinkEvent::Disconnected),
        }
        Ok(())
    }

    async fn check_password_enable(&self) -> LinkResult<()> {
        self.record(Call::CheckPasswordEnable);
        let script = self.script();
        if script.hang_password_check {
            std::future::pending::<()>().await;
        }
        if script.answer_password_check {
            self.emit(LinkEvent::PasswordStateChecked {
                is_set: script.device_password.is_some(),
            });
        }
        for event in script.after_password_check {
            self.emit(event);
        }
        Ok(())
    }

    async fn validate_password(&self, code: &str) -> LinkResult<()> {
        self.record(Call::ValidatePassword(code.to_string()));
        let success = self.script().device_password.as_deref() == Some(code);
        self.emit(LinkEvent::PasswordVerifyResult { success });
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> LinkResult<()> {
        self.record(Call::Send(data.to_vec()));
        Ok(())
    }

    fn events(&self) -> &EventBus {
        &self.bus
    }
}
