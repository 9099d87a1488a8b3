//! # Device Link Abstraction
//!
//! The vendor radio SDK, seen from the state machine. Calls are
//! fire-and-forget commands; their outcomes arrive as [`LinkEvent`]s on the
//! link's [`EventBus`].
//!
//! ```text
//! command                      expected signal(s)
//! ─────────────────────────    ─────────────────────────────────────
//! start_scan(d, filter)    ──► DeviceScanned(identity) ...
//! connect(addr, imei, pair)──► Connected, AuthenticationPassed
//!                              | ConnectFailure(status, message)
//! check_password_enable()  ──► PasswordStateChecked { is_set }
//! validate_password(code)  ──► PasswordVerifyResult { success }
//! disconnect()             ──► Disconnected
//! (device push)            ──► NotifyReceived(bytes)
//! ```

use async_trait::async_trait;
use std::time::Duration;

use eld_core::DeviceIdentity;

use crate::error::LinkResult;
use crate::events::EventBus;

/// Abstract short-range link to an ELD.
#[async_trait]
pub trait DeviceLink: Send + Sync + 'static {
    /// Starts discovery for at most `duration`.
    async fn start_scan(&self, duration: Duration, filter: &ScanFilter) -> LinkResult<()>;

    async fn stop_scan(&self) -> LinkResult<()>;

    /// Establishes the link and starts the device-side authentication.
    async fn connect(&self, address: &str, imei: &str, need_pair: bool) -> LinkResult<()>;

    /// Tears the link down. Must succeed when already disconnected.
    async fn disconnect(&self) -> LinkResult<()>;

    /// Asks the device whether a password policy is enabled.
    async fn check_password_enable(&self) -> LinkResult<()>;

    /// Submits a passcode for verification.
    async fn validate_password(&self, code: &str) -> LinkResult<()>;

    /// Writes raw bytes to the device.
    async fn send(&self, data: &[u8]) -> LinkResult<()>;

    /// Inbound event stream of this link.
    fn events(&self) -> &EventBus;
}

// =============================================================================
// Scan Filter
// =============================================================================

/// Which discovered devices a scan session keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Keep devices whose advertised name starts with any of these.
    /// Empty keeps every device.
    pub name_prefixes: Vec<String>,

    /// Drop devices weaker than this RSSI (dBm).
    pub min_signal: Option<i16>,
}

impl ScanFilter {
    pub fn with_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScanFilter {
            name_prefixes: prefixes.into_iter().map(Into::into).collect(),
            min_signal: None,
        }
    }

    pub fn min_signal(mut self, rssi: i16) -> Self {
        self.min_signal = Some(rssi);
        self
    }

    /// Returns true if the identity passes the filter.
    ///
    /// A device with no advertised name only passes an empty prefix list;
    /// an unknown signal passes any signal floor.
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        let name_ok = self.name_prefixes.is_empty()
            || identity
                .display_name
                .as_deref()
                .is_some_and(|name| self.name_prefixes.iter().any(|p| name.starts_with(p.as_str())));

        let signal_ok = match (self.min_signal, identity.last_seen_signal) {
            (Some(floor), Some(rssi)) => rssi >= floor,
            _ => true,
        };

        name_ok && signal_ok
    }
}
