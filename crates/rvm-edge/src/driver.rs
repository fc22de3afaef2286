//! # Protocol Driver
//!
//! Handshake and heartbeat exchanges with the backend. The driver is the only
//! producer of success and failure signals for the connectivity controller.
//!
//! ## Exchanges
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  startup                                                                │
//! │    handshake_until_success ──► POST /edge/handshake  (15s)              │
//! │        │   payload: diagnostics snapshot + hardware_id + name           │
//! │        │   ok:   {"status":"success","data":{identity, kiosk, policy}}  │
//! │        └── failed? wait 5s (constant backoff), try again, forever       │
//! │                                                                         │
//! │  every ~40s                                                             │
//! │    heartbeat(bin_capacity, discovery) ──► POST /edge/heartbeat  (5s)    │
//! │        ok:   {"status":"success","commands":[...]} ──► commands         │
//! │        else: no commands                                                │
//! │                                                                         │
//! │  every outcome ──► controller.on_success(body) / on_failure(reason)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport errors stop here. Callers only ever see "it worked" (with the
//! response data) or "it didn't".

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::{parse_commands, RemoteCommand};
use crate::config::EdgeConfig;
use crate::controller::{extract_donation_user_id, ConnectivityController};
use crate::error::{EdgeError, EdgeResult};
use crate::hardware::{local_ip, HardwareProbe};
use crate::transport::{HttpResponse, HttpTransport};

pub const HANDSHAKE_PATH: &str = "/edge/handshake";
pub const HEARTBEAT_PATH: &str = "/edge/heartbeat";

// =============================================================================
// Options
// =============================================================================

/// Identity and timing used by the driver.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Device serial. Empty means "use the hardware identity".
    pub hardware_id: String,
    /// Display name. Empty means "use the host name".
    pub name: String,
    pub version: String,
    pub handshake_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub retry_interval: Duration,
}

impl DriverOptions {
    pub fn from_config(config: &EdgeConfig) -> Self {
        DriverOptions {
            hardware_id: config.device.serial_number.clone(),
            name: config.device.name.clone(),
            version: config.device.version.clone(),
            handshake_timeout: config.server.handshake_timeout(),
            heartbeat_timeout: config.server.heartbeat_timeout(),
            retry_interval: config.handshake_retry(),
        }
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        DriverOptions {
            hardware_id: String::new(),
            name: String::new(),
            version: rvm_core::DEFAULT_AGENT_VERSION.to_string(),
            handshake_timeout: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// What a successful handshake told us.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeInfo {
    /// `data.identity.rvm_name`
    pub rvm_name: Option<String>,
    /// `data.kiosk.url`
    pub kiosk_url: Option<String>,
    pub system_donation_user_id: Option<i64>,
    /// The whole `data` object.
    pub data: Value,
}

impl HandshakeInfo {
    fn from_body(body: &Value) -> Self {
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let text = |pointer: &str| data.pointer(pointer).and_then(Value::as_str).map(String::from);

        HandshakeInfo {
            rvm_name: text("/identity/rvm_name"),
            kiosk_url: text("/kiosk/url"),
            system_donation_user_id: extract_donation_user_id(body),
            data,
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

pub struct ProtocolDriver {
    transport: Arc<dyn HttpTransport>,
    controller: Arc<ConnectivityController>,
    hardware: Arc<dyn HardwareProbe>,
    options: DriverOptions,
    /// Hardware id actually sent, resolved on the first handshake.
    hardware_id: RwLock<String>,
}

impl ProtocolDriver {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        controller: Arc<ConnectivityController>,
        hardware: Arc<dyn HardwareProbe>,
        options: DriverOptions,
    ) -> Self {
        let hardware_id = RwLock::new(options.hardware_id.clone());
        ProtocolDriver {
            transport,
            controller,
            hardware,
            options,
            hardware_id,
        }
    }

    /// The hardware id sent with heartbeats.
    pub fn hardware_id(&self) -> String {
        self.hardware_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Performs one handshake.
    ///
    /// ## Returns
    /// * `Some(HandshakeInfo)` - 2xx with `"status": "success"`
    /// * `None` - anything else; the controller has been told
    pub async fn handshake(&self) -> Option<HandshakeInfo> {
        let mut payload = self.hardware.diagnostics_snapshot().await;

        let hardware_id = resolve(&self.options.hardware_id, &payload["device_id"]);
        let name = resolve(&self.options.name, &payload["name"]);
        if let Value::Object(ref mut map) = payload {
            map.insert("hardware_id".into(), json!(hardware_id));
            map.insert("name".into(), json!(name));
        }
        *self
            .hardware_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = hardware_id.clone();

        info!(hardware_id = %hardware_id, "Handshaking with backend");

        let response = self
            .exchange(HANDSHAKE_PATH, &payload, self.options.handshake_timeout, "handshake")
            .await?;

        let info = HandshakeInfo::from_body(&response.body);
        self.controller.on_success(&response.body);

        info!(
            rvm_name = info.rvm_name.as_deref().unwrap_or("unknown"),
            user_id = ?info.system_donation_user_id,
            "Handshake success"
        );
        Some(info)
    }

    /// Retries [`handshake`](Self::handshake) at a constant interval until it
    /// succeeds or `shutdown` fires.
    pub async fn handshake_until_success(
        &self,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> EdgeResult<HandshakeInfo> {
        let mut backoff = Constant::new(self.options.retry_interval);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if let Some(info) = self.handshake().await {
                return Ok(info);
            }

            let delay = backoff
                .next_backoff()
                .ok_or_else(|| EdgeError::Internal("Handshake backoff exhausted".into()))?;
            warn!(attempt, ?delay, "Handshake failed, retrying");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    info!("Shutdown during handshake retry");
                    return Err(EdgeError::ShuttingDown);
                }
            }
        }
    }

    /// Sends one heartbeat.
    ///
    /// ## Arguments
    /// * `bin_capacity` - Fill level, 0-100
    /// * `discovery` - Output of [`HardwareProbe::discovery_snapshot`]
    ///
    /// ## Returns
    /// Commands from a successful response; empty otherwise.
    pub async fn heartbeat(&self, bin_capacity: u8, discovery: Value) -> Vec<RemoteCommand> {
        let payload = json!({
            "hardware_id": self.hardware_id(),
            "status": "online",
            "version": self.options.version,
            "health_metrics": self.hardware.health_metrics().await,
            "bin_capacity": bin_capacity,
            "discovery": discovery,
            "ip_local": local_ip().to_string(),
            "tailscale_ip": self.hardware.vpn_ip().await,
        });

        let Some(response) = self
            .exchange(HEARTBEAT_PATH, &payload, self.options.heartbeat_timeout, "heartbeat")
            .await
        else {
            return Vec::new();
        };

        self.controller.on_success(&response.body);

        let commands = parse_commands(&response.body);
        if !commands.is_empty() {
            info!(count = commands.len(), "Received remote commands");
        }
        commands
    }

    /// POSTs and classifies the answer. Every failure is reported to the
    /// controller here.
    async fn exchange(
        &self,
        path: &str,
        payload: &Value,
        timeout: Duration,
        label: &str,
    ) -> Option<HttpResponse> {
        let response = match self.transport.post_json(path, payload, timeout).await {
            Ok(response) => response,
            Err(e) => {
                self.controller.on_failure(&format!("{} {}: {}", label, e.kind(), e));
                return None;
            }
        };

        if let Err(e) = response.clone().error_for_status() {
            self.controller.on_failure(&format!("{} {}", label, e));
            return None;
        }

        if !response.reports_success() {
            let message = response
                .body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no success status");
            self.controller
                .on_failure(&format!("{} rejected: {}", label, message));
            return None;
        }

        debug!(path, status = response.status, "Exchange succeeded");
        Some(response)
    }
}

impl std::fmt::Debug for ProtocolDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolDriver")
            .field("hardware_id", &self.hardware_id())
            .field("options", &self.options)
            .finish()
    }
}

/// Configured value unless empty, then the probed one.
fn resolve(configured: &str, probed: &Value) -> String {
    if !configured.trim().is_empty() {
        return configured.to_string();
    }
    probed.as_str().unwrap_or("unknown").to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
