//! # Agent Configuration
//!
//! Configuration for the device link, sync engine, compliance monitors and
//! durability store.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ELD_DEVICE_ADDRESS=C4:A8:28:43:14:9A                               │
//! │     ELD_BACKEND_URL=https://...                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/agent/agent.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.eld.agent/agent.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! address = "C4:A8:28:43:14:9A"
//! imei = "123456789012345"
//! passcode = "12345678"
//! name_prefixes = ["PT30", "KD032"]
//!
//! [sync]
//! backend_url = "https://api.example.com/eld/batches"
//! batch_size = 50
//! poll_interval_secs = 60
//!
//! [compliance]
//! speed_threshold_mph = 5.0
//! inactivity_secs = 300
//! prompt_timeout_secs = 60
//!
//! [storage]
//! database_path = "/var/lib/eld/eld.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Settings
// =============================================================================

/// Which device to talk to and how to authenticate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Address to connect to. When unset the agent scans first.
    #[serde(default)]
    pub address: Option<String>,

    /// IMEI presented to the device on connect.
    #[serde(default)]
    pub imei: String,

    /// Passcode for devices with a password policy.
    #[serde(default)]
    pub passcode: Option<String>,

    /// Ask the radio stack to bond before connecting.
    #[serde(default)]
    pub need_pair: bool,

    /// Deadline for the connect-through-authenticate sequence (seconds).
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// How long a discovery scan runs (seconds).
    #[serde(default = "default_scan_duration")]
    pub scan_duration_secs: u64,

    /// Advertised-name prefixes accepted during a scan.
    #[serde(default = "default_name_prefixes")]
    pub name_prefixes: Vec<String>,
}

fn default_auth_timeout() -> u64 {
    eld_core::DEFAULT_AUTH_TIMEOUT_SECS
}

fn default_scan_duration() -> u64 {
    10
}

fn default_name_prefixes() -> Vec<String> {
    vec!["PT30".to_string(), "KD032".to_string()]
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            address: None,
            imei: String::new(),
            passcode: None,
            need_pair: false,
            auth_timeout_secs: default_auth_timeout(),
            scan_duration_secs: default_scan_duration(),
            name_prefixes: default_name_prefixes(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Primary batch endpoint. Sync is disabled when unset.
    #[serde(default)]
    pub backend_url: Option<String>,

    /// Best-effort mirror endpoints.
    #[serde(default)]
    pub mirror_urls: Vec<String>,

    /// Offline records per upload.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Interval between periodic sync runs (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-request HTTP timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Synced records older than this are pruned.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_batch_size() -> usize {
    eld_core::DEFAULT_BATCH_SIZE
}
fn default_poll_interval() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    30
}
fn default_retention_days() -> u32 {
    7
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            backend_url: None,
            mirror_urls: Vec::new(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            retention_days: default_retention_days(),
        }
    }
}

// =============================================================================
// Compliance Settings
// =============================================================================

/// Motion restriction and inactivity monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceSettings {
    /// Duty-status endpoint used by the inactivity auto-switch.
    #[serde(default)]
    pub api_url: Option<String>,

    /// Speed at or above which the vehicle is moving.
    #[serde(default = "default_speed_threshold")]
    pub speed_threshold_mph: f64,

    /// Motion restriction recompute interval (milliseconds).
    #[serde(default = "default_compliance_poll")]
    pub poll_interval_ms: u64,

    /// Stopped-while-driving time before the driver is prompted (seconds).
    #[serde(default = "default_inactivity")]
    pub inactivity_secs: u64,

    /// Time the prompt may stay unanswered before the auto-switch (seconds).
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,
}

fn default_speed_threshold() -> f64 {
    eld_core::DEFAULT_MOTION_THRESHOLD_MPH
}
fn default_compliance_poll() -> u64 {
    1000
}
fn default_inactivity() -> u64 {
    300
}
fn default_prompt_timeout() -> u64 {
    60
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        ComplianceSettings {
            api_url: None,
            speed_threshold_mph: default_speed_threshold(),
            poll_interval_ms: default_compliance_poll(),
            inactivity_secs: default_inactivity(),
            prompt_timeout_secs: default_prompt_timeout(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Durability store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Agent Configuration
// =============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub compliance: ComplianceSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl AgentConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load agent config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Agent config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.device.auth_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "auth_timeout_secs must be greater than 0".into(),
            ));
        }

        let threshold = self.compliance.speed_threshold_mph;
        if threshold.is_nan() || threshold <= 0.0 {
            return Err(SyncError::InvalidConfig(format!(
                "speed_threshold_mph must be positive, got: {}",
                self.compliance.speed_threshold_mph
            )));
        }

        let urls = self
            .sync
            .backend_url
            .iter()
            .chain(&self.sync.mirror_urls)
            .chain(&self.compliance.api_url);
        for url in urls {
            validate_http_url(url)?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("ELD_DEVICE_ADDRESS") {
            debug!(address = %address, "Overriding device address from environment");
            self.device.address = Some(address);
        }

        if let Ok(imei) = std::env::var("ELD_DEVICE_IMEI") {
            self.device.imei = imei;
        }

        if let Ok(passcode) = std::env::var("ELD_DEVICE_PASSCODE") {
            self.device.passcode = Some(passcode);
        }

        if let Ok(url) = std::env::var("ELD_BACKEND_URL") {
            debug!(url = %url, "Overriding backend URL from environment");
            self.sync.backend_url = Some(url);
        }

        if let Ok(size) = std::env::var("ELD_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => self.sync.batch_size = n,
                Err(_) => warn!(value = %size, "Ignoring non-numeric ELD_BATCH_SIZE"),
            }
        }

        if let Ok(url) = std::env::var("ELD_COMPLIANCE_API_URL") {
            self.compliance.api_url = Some(url);
        }

        if let Ok(path) = std::env::var("ELD_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "eld", "agent")
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Configured database path, or `eld.db` in the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("eld.db")))
            .unwrap_or_else(|| PathBuf::from("eld.db"))
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.device.auth_timeout_secs)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.device.scan_duration_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    /// Returns true if a primary backend is configured.
    pub fn is_sync_enabled(&self) -> bool {
        self.sync.backend_url.is_some()
    }
}

fn validate_http_url(raw: &str) -> SyncResult<()> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SyncError::InvalidUrl(format!(
            "URL must use http:// or https://, got {}:// in {}",
            other, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.device.auth_timeout_secs, 30);
        assert_eq!(config.compliance.speed_threshold_mph, 5.0);
        assert_eq!(config.compliance.inactivity_secs, 300);
        assert_eq!(config.compliance.prompt_timeout_secs, 60);
        assert!(!config.is_sync_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AgentConfig::default();

        config.sync.batch_size = 0;
        assert!(config.validate().is_err());
        config.sync.batch_size = 50;

        config.device.auth_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.device.auth_timeout_secs = 30;

        config.compliance.speed_threshold_mph = 0.0;
        assert!(config.validate().is_err());
        config.compliance.speed_threshold_mph = f64::NAN;
        assert!(config.validate().is_err());
        config.compliance.speed_threshold_mph = 5.0;

        config.sync.backend_url = Some("ws://localhost:8080".into());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.sync.backend_url = Some("not a url".into());
        assert!(config.validate().unwrap_err().is_config_error());

        config.sync.backend_url = Some("https://api.example.com/eld/batches".into());
        assert!(config.validate().is_ok());

        config.sync.mirror_urls = vec!["ftp://mirror".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            [device]
            address = "C4:A8:28:43:14:9A"
            imei = "123456789012345"

            [sync]
            batch_size = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.device.address.as_deref(), Some("C4:A8:28:43:14:9A"));
        assert_eq!(config.device.name_prefixes, vec!["PT30", "KD032"]);
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(config.sync.retention_days, 7);
        assert_eq!(config.compliance.poll_interval_ms, 1000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.toml");

        let mut config = AgentConfig::default();
        config.device.imei = "123456789012345".into();
        config.device.passcode = Some("12345678".into());
        config.storage.database_path = Some(dir.path().join("eld.db"));
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[device]"));
        assert!(contents.contains("[compliance]"));

        let loaded: AgentConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.device.passcode.as_deref(), Some("12345678"));
        assert_eq!(loaded.database_path(), dir.path().join("eld.db"));
    }
}
