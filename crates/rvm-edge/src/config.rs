//! # Edge Configuration
//!
//! Configuration management for the edge agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     RVM_API_KEY=...                                                    │
//! │     RVM_SERVER_URL=https://...                                         │
//! │                                                                         │
//! │  2. secrets.env next to the config file                                │
//! │     Only fills variables that are not already set                      │
//! │                                                                         │
//! │  3. TOML Config File                                                   │
//! │     ~/.config/edge/edge.toml (Linux)                                   │
//! │                                                                         │
//! │  4. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! serial_number = "RVM-202601-006"
//! name = "Lobby Machine"
//!
//! [server]
//! base_url = "https://myrvm.penelitian.my.id/api/v1"
//! heartbeat_timeout_secs = 5
//!
//! [timing]
//! poll_interval_secs = 10
//! network_interval_secs = 30
//!
//! [bridge]
//! port = 8002
//!
//! [storage]
//! retention_days = 30
//!
//! [controller]
//! failure_threshold = 3
//! ```
//!
//! The API key belongs in `secrets.env` or the environment, not in the TOML
//! file; it is never written back by [`EdgeConfig::save`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EdgeError, EdgeResult};
use rvm_core::{DEFAULT_AGENT_VERSION, DEFAULT_FAILURE_THRESHOLD};

/// File name of the optional secrets file next to `edge.toml`.
pub const SECRETS_FILE: &str = "secrets.env";

// =============================================================================
// Device
// =============================================================================

/// Identity of this machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hardware id reported to the backend.
    /// Empty means "use the probed machine id".
    #[serde(default)]
    pub serial_number: String,

    /// Display name. Empty means "use the host name".
    #[serde(default)]
    pub name: String,

    /// Agent version reported in heartbeats.
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    DEFAULT_AGENT_VERSION.to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            serial_number: String::new(),
            name: String::new(),
            version: default_version(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Backend API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API root, e.g. `https://host/api/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Device API key. Loaded from the environment.
    #[serde(default, skip_serializing)]
    pub api_key: String,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://myrvm.penelitian.my.id/api/v1".to_string()
}
fn default_handshake_timeout() -> u64 {
    15
}
fn default_heartbeat_timeout() -> u64 {
    5
}
fn default_sync_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            base_url: default_base_url(),
            api_key: String::new(),
            handshake_timeout_secs: default_handshake_timeout(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            sync_timeout_secs: default_sync_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

// =============================================================================
// Timing
// =============================================================================

/// Control loop cadence.
///
/// One heartbeat cycle is `poll_interval + network_interval` long.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause between handshake attempts.
    #[serde(default = "default_handshake_retry")]
    pub handshake_retry_secs: u64,

    /// Hardware poll tick.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Network tick after the hardware tick.
    #[serde(default = "default_network_interval")]
    pub network_interval_secs: u64,
}

fn default_handshake_retry() -> u64 {
    5
}
fn default_poll_interval() -> u64 {
    10
}
fn default_network_interval() -> u64 {
    30
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            handshake_retry_secs: default_handshake_retry(),
            poll_interval_secs: default_poll_interval(),
            network_interval_secs: default_network_interval(),
        }
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// Local kiosk bridge listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_bridge_port() -> u16 {
    8002
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            bind_addr: default_bind_addr(),
            port: default_bridge_port(),
        }
    }
}

impl BridgeConfig {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Offline store location and housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file. `None` means `<data dir>/offline.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Synced rows older than this many days are purged at startup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database_path: None,
            retention_days: default_retention_days(),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Consecutive failures before going OFFLINE_GUEST.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            failure_threshold: default_failure_threshold(),
        }
    }
}

// =============================================================================
// Main Edge Configuration
// =============================================================================

/// Complete edge agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub controller: ControllerConfig,
}

impl EdgeConfig {
    /// Loads configuration from file, secrets, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (edge.toml)
    /// 3. secrets.env beside the config file
    /// 4. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EdgeResult<Self> {
        let mut config = Self::default();
        let path = config_path.or_else(Self::default_config_path);

        if let Some(ref path) = path {
            if path.exists() {
                info!(?path, "Loading edge config from file");
                let contents = std::fs::read_to_string(path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }

            if let Some(dir) = path.parent() {
                load_secrets(dir);
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load edge config: {}. Using defaults.", e);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Saves configuration to file. The API key is not written.
    pub fn save(&self, config_path: Option<PathBuf>) -> EdgeResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EdgeError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EdgeError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| EdgeError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Edge config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EdgeResult<()> {
        if self.server.api_key.trim().is_empty() {
            return Err(EdgeError::InvalidConfig(
                "API key missing. Set RVM_API_KEY or add it to secrets.env".into(),
            ));
        }

        let url = url::Url::parse(&self.server.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(EdgeError::InvalidUrl(format!(
                "Server URL must start with http:// or https://, got: {}",
                self.server.base_url
            )));
        }

        let durations = [
            ("server.handshake_timeout_secs", self.server.handshake_timeout_secs),
            ("server.heartbeat_timeout_secs", self.server.heartbeat_timeout_secs),
            ("server.sync_timeout_secs", self.server.sync_timeout_secs),
            ("timing.handshake_retry_secs", self.timing.handshake_retry_secs),
            ("timing.poll_interval_secs", self.timing.poll_interval_secs),
            ("timing.network_interval_secs", self.timing.network_interval_secs),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, secs)| *secs == 0) {
            return Err(EdgeError::InvalidConfig(format!(
                "{} must be greater than 0",
                name
            )));
        }

        if self.controller.failure_threshold == 0 {
            return Err(EdgeError::InvalidConfig(
                "controller.failure_threshold must be greater than 0".into(),
            ));
        }

        if self.bridge.port == 0 {
            return Err(EdgeError::InvalidConfig(
                "bridge.port must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(serial) = lookup("RVM_SERIAL_NUMBER") {
            debug!(serial = %serial, "Overriding serial number from environment");
            self.device.serial_number = serial;
        }

        if let Some(name) = lookup("RVM_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(url) = lookup("RVM_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.base_url = url;
        }

        if let Some(key) = lookup("RVM_API_KEY") {
            self.server.api_key = key;
        }

        if let Some(port) = lookup("RVM_BRIDGE_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.bridge.port = p,
                Err(_) => warn!(port = %port, "Ignoring invalid RVM_BRIDGE_PORT"),
            }
        }

        if let Some(path) = lookup("RVM_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("id", "myrvm", "edge")
            .map(|dirs| dirs.config_dir().join("edge.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Resolved SQLite path.
    pub fn database_path(&self) -> PathBuf {
        if let Some(ref path) = self.storage.database_path {
            return path.clone();
        }

        directories::ProjectDirs::from("id", "myrvm", "edge")
            .map(|dirs| dirs.data_dir().join("offline.db"))
            .unwrap_or_else(|| PathBuf::from("offline.db"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.timing.poll_interval_secs)
    }

    pub fn network_interval(&self) -> Duration {
        Duration::from_secs(self.timing.network_interval_secs)
    }

    pub fn handshake_retry(&self) -> Duration {
        Duration::from_secs(self.timing.handshake_retry_secs)
    }
}

/// Loads `secrets.env` from `dir` without replacing variables already set.
fn load_secrets(dir: &Path) {
    let path = dir.join(SECRETS_FILE);
    if !path.exists() {
        return;
    }

    match dotenv::from_path(&path) {
        Ok(()) => debug!(?path, "Loaded secrets file"),
        Err(e) => warn!(?path, error = %e, "Failed to read secrets file"),
    }
}
