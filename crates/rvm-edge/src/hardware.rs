//! # Hardware Collaborator
//!
//! The narrow interface the control loop and the protocol driver use to read
//! the machine: one distance reading, a discovery report and a diagnostics
//! snapshot.
//!
//! ```text
//! ┌──────────────────┐  poll_bin_distance()     ┌─────────────────────────┐
//! │ EdgeAgent loop   │─────────────────────────►│                         │
//! │                  │  discovery_snapshot()    │   dyn HardwareProbe     │
//! │ ProtocolDriver   │─────────────────────────►│                         │
//! │  (handshake)     │  diagnostics_snapshot()  │  SystemProbe: sysinfo,  │
//! │                  │─────────────────────────►│  /etc, /dev, hostname   │
//! └──────────────────┘                          └─────────────────────────┘
//! ```
//!
//! GPIO, motors and cameras are driven elsewhere. [`SystemProbe`] only reads
//! what Linux exposes and never reports a distance.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sysinfo::{Disks, System};
use tracing::debug;

use rvm_core::now_timestamp;

/// Root disk usage at or above this is reported as `Critical`.
const DISK_CRITICAL_PERCENT: f64 = 95.0;

/// Reads sensors and describes the device.
#[async_trait]
pub trait HardwareProbe: Send + Sync {
    /// Ultrasonic distance to the bin contents in centimetres, if a sensor
    /// is present and answered.
    async fn poll_bin_distance(&self) -> Option<f64>;

    /// Live hardware discovery: `{reality, configured_count, healthy_count}`.
    async fn discovery_snapshot(&self) -> Value;

    /// Identity, network, system, inventory, diagnostics and health metrics.
    async fn diagnostics_snapshot(&self) -> Value;

    /// CPU, memory and disk usage, sent with every heartbeat.
    async fn health_metrics(&self) -> Value {
        self.diagnostics_snapshot().await["health_metrics"].clone()
    }

    /// VPN (Tailscale) address, if the device has one.
    async fn vpn_ip(&self) -> Option<String> {
        None
    }
}

// =============================================================================
// System Probe
// =============================================================================

/// Probe for the machine the agent runs on. Usage figures come from
/// `sysinfo`; board identity and attached devices from the file system.
pub struct SystemProbe {
    root: PathBuf,
    agent_version: String,
    /// Kept between calls so CPU usage covers the time since the last one.
    system: Mutex<System>,
}

impl SystemProbe {
    pub fn new(agent_version: impl Into<String>) -> Self {
        Self::with_root("/", agent_version)
    }

    /// Reads `etc/`, `proc/device-tree` and `dev/` below `root` instead of `/`.
    pub fn with_root(root: impl Into<PathBuf>, agent_version: impl Into<String>) -> Self {
        let mut system = System::new();
        // First sample; usage is measured against it
        system.refresh_cpu_usage();

        SystemProbe {
            root: root.into(),
            agent_version: agent_version.into(),
            system: Mutex::new(system),
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    async fn read_trimmed(&self, relative: &str) -> Option<String> {
        let text = tokio::fs::read_to_string(self.path(relative)).await.ok()?;
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        (!text.is_empty()).then(|| text.to_string())
    }

    /// `/etc/machine-id`, the stable hardware identity.
    pub async fn device_id(&self) -> String {
        self.read_trimmed("etc/machine-id")
            .await
            .unwrap_or_else(|| "unknown-device-id".to_string())
    }

    pub fn host_name(&self) -> String {
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "rvm-edge".to_string())
    }

    /// Lists `/dev` entries whose names start with any of `prefixes`.
    async fn dev_entries(&self, prefixes: &[&str]) -> Vec<String> {
        let mut found = Vec::new();
        let Ok(mut dir) = tokio::fs::read_dir(self.path("dev")).await else {
            return found;
        };

        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if prefixes.iter().any(|p| name.starts_with(p)) {
                found.push(format!("/dev/{}", name));
            }
        }
        found.sort();
        found
    }

    async fn inventory(&self) -> Value {
        json!({
            "cameras": self.dev_entries(&["video"]).await,
            "i2c_devices": self.dev_entries(&["i2c-"]).await,
            "serial_ports": self.dev_entries(&["ttyUSB", "ttyACM", "ttyTHS"]).await,
        })
    }

    /// CPU (since the previous call), memory and root disk usage.
    fn usage(&self) -> Usage {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpus = system.cpus();
        let cpu = (!cpus.is_empty()).then(|| {
            let total: f64 = cpus.iter().map(|cpu| f64::from(cpu.cpu_usage())).sum();
            round1(total / cpus.len() as f64)
        });

        let memory = percent_used(system.total_memory(), system.used_memory());

        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"))
            .and_then(|disk| {
                percent_used(
                    disk.total_space(),
                    disk.total_space().saturating_sub(disk.available_space()),
                )
            });

        Usage { cpu, memory, disk }
    }

    async fn tailscale_ip(&self) -> Option<String> {
        let output = tokio::time::timeout(
            Duration::from_secs(2),
            tokio::process::Command::new("tailscale").args(["ip", "-4"]).output(),
        )
        .await;

        match output {
            Ok(Ok(out)) if out.status.success() => {
                let ip = String::from_utf8_lossy(&out.stdout).trim().to_string();
                (!ip.is_empty()).then_some(ip)
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe")
            .field("root", &self.root)
            .field("agent_version", &self.agent_version)
            .finish()
    }
}

#[async_trait]
impl HardwareProbe for SystemProbe {
    async fn poll_bin_distance(&self) -> Option<f64> {
        None
    }

    async fn discovery_snapshot(&self) -> Value {
        json!({
            "reality": self.inventory().await,
            "configured_count": 0,
            "healthy_count": 0,
        })
    }

    async fn health_metrics(&self) -> Value {
        self.usage().to_json()
    }

    async fn vpn_ip(&self) -> Option<String> {
        self.tailscale_ip().await
    }

    async fn diagnostics_snapshot(&self) -> Value {
        let model = self.read_trimmed("proc/device-tree/model").await;
        let inventory = self.inventory().await;
        let usage = self.usage();

        let timezone = self
            .read_trimmed("etc/timezone")
            .await
            .unwrap_or_else(|| "UTC".to_string());

        let snapshot = json!({
            "device_id": self.device_id().await,
            "name": self.host_name(),
            "ip_local": local_ip().to_string(),
            "ip_vpn": self
                .tailscale_ip()
                .await
                .unwrap_or_else(|| "Not Connected".to_string()),
            "timezone": timezone,
            "system": {
                "agent_version": self.agent_version,
                "os": System::long_os_version(),
                "arch": std::env::consts::ARCH,
                "kernel": System::kernel_version(),
                "model": model,
            },
            "controller_type": controller_type(model.as_deref(), std::env::consts::ARCH),
            "hardware_info": {
                "summary": "Hardware Auto-Detection Report",
                "detected_cameras": inventory["cameras"],
                "detected_i2c": inventory["i2c_devices"],
                "detected_serial": inventory["serial_ports"],
            },
            "diagnostics": {
                "timestamp": now_timestamp(),
                "disk": disk_status(usage.disk),
                "camera": camera_status(&inventory["cameras"]),
                "sensor": {"status": "Fail", "error": "Driver not loaded"},
                "mcu": mcu_status(&inventory["serial_ports"]),
            },
            "health_metrics": usage.to_json(),
        });

        debug!("Diagnostics snapshot collected");
        snapshot
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// One usage sample; `None` where the platform gave nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Usage {
    cpu: Option<f64>,
    memory: Option<f64>,
    disk: Option<f64>,
}

impl Usage {
    fn to_json(self) -> Value {
        json!({
            "cpu_usage_percent": self.cpu,
            "memory_usage_percent": self.memory,
            "disk_usage_percent": self.disk,
        })
    }
}

/// LAN address of the default interface, or loopback.
pub fn local_ip() -> IpAddr {
    local_ip_address::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percent_used(total: u64, used: u64) -> Option<f64> {
    (total > 0).then(|| round1(used as f64 / total as f64 * 100.0))
}

/// Classifies the board from its device-tree model string.
fn controller_type(model: Option<&str>, arch: &str) -> String {
    match model {
        Some(m) if m.contains("NVIDIA") || m.contains("Jetson") => "NVIDIA Jetson".to_string(),
        Some(m) if m.contains("Raspberry Pi") => "Raspberry Pi".to_string(),
        Some(m) => m.to_string(),
        None if arch == "aarch64" || arch.starts_with("arm") => {
            "Generic ARM Edge Device".to_string()
        }
        None => "Generic x86 Host".to_string(),
    }
}

fn disk_status(usage_percent: Option<f64>) -> Value {
    match usage_percent {
        Some(p) if p >= DISK_CRITICAL_PERCENT => json!({"status": "Critical", "usage_percent": p}),
        Some(p) => json!({"status": "Pass", "usage_percent": p}),
        None => json!({"status": "Unknown", "error": "Root filesystem not found"}),
    }
}

fn camera_status(cameras: &Value) -> Value {
    match cameras.as_array() {
        Some(list) if !list.is_empty() => {
            json!({"status": "Pass", "count": list.len(), "details": list})
        }
        _ => json!({"status": "Not Detected", "details": []}),
    }
}

/// USB/ACM serial ports are where the bin MCU shows up.
fn mcu_status(serial_ports: &Value) -> Value {
    let candidates: Vec<&str> = serial_ports
        .as_array()
        .map(|ports| {
            ports
                .iter()
                .filter_map(Value::as_str)
                .filter(|path| path.contains("USB") || path.contains("ACM"))
                .collect()
        })
        .unwrap_or_default();

    if candidates.is_empty() {
        json!({"status": "Fail", "error": "No MCU-like serial ports detected"})
    } else {
        json!({"status": "Pass", "candidates": candidates})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::create_dir_all(root.join("proc/device-tree")).unwrap();
        fs::create_dir_all(root.join("dev")).unwrap();

        fs::write(root.join("etc/machine-id"), "4f2c9e0d1b\n").unwrap();
        fs::write(root.join("etc/timezone"), "Asia/Jakarta\n").unwrap();
        fs::write(root.join("proc/device-tree/model"), "NVIDIA Jetson Orin Nano\0").unwrap();
        fs::write(root.join("dev/video0"), "").unwrap();
        fs::write(root.join("dev/ttyACM0"), "").unwrap();
        fs::write(root.join("dev/null"), "").unwrap();
        dir
    }

    fn assert_percent(value: &Value) {
        if let Some(p) = value.as_f64() {
            assert!((0.0..=100.0).contains(&p), "{} out of range", p);
        } else {
            assert!(value.is_null(), "unexpected {}", value);
        }
    }

    #[tokio::test]
    async fn test_identity() {
        let root = fake_root();
        let probe = SystemProbe::with_root(root.path(), "1.1.0");

        assert_eq!(probe.device_id().await, "4f2c9e0d1b");
        assert!(!probe.host_name().is_empty());
        assert_eq!(probe.poll_bin_distance().await, None);
    }

    #[tokio::test]
    async fn test_missing_files_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let probe = SystemProbe::with_root(dir.path(), "1.1.0");

        assert_eq!(probe.device_id().await, "unknown-device-id");

        let discovery = probe.discovery_snapshot().await;
        assert_eq!(discovery["reality"]["cameras"], json!([]));
    }

    #[tokio::test]
    async fn test_discovery_lists_devices() {
        let root = fake_root();
        let probe = SystemProbe::with_root(root.path(), "1.1.0");

        let discovery = probe.discovery_snapshot().await;
        assert_eq!(discovery["reality"]["cameras"], json!(["/dev/video0"]));
        assert_eq!(discovery["reality"]["serial_ports"], json!(["/dev/ttyACM0"]));
        assert_eq!(discovery["configured_count"], 0);
        assert_eq!(discovery["healthy_count"], 0);
    }

    #[tokio::test]
    async fn test_diagnostics_shape() {
        let root = fake_root();
        let probe = SystemProbe::with_root(root.path(), "1.1.0");

        let snapshot = probe.diagnostics_snapshot().await;
        for key in [
            "device_id",
            "name",
            "ip_local",
            "ip_vpn",
            "timezone",
            "system",
            "controller_type",
            "hardware_info",
            "diagnostics",
            "health_metrics",
        ] {
            assert!(snapshot.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(snapshot["controller_type"], "NVIDIA Jetson");
        assert_eq!(snapshot["timezone"], "Asia/Jakarta");
        assert_eq!(snapshot["system"]["agent_version"], "1.1.0");
        assert_eq!(snapshot["diagnostics"]["camera"]["status"], "Pass");
        assert_eq!(snapshot["diagnostics"]["mcu"]["status"], "Pass");
        assert!(snapshot["diagnostics"]["disk"]["status"].is_string());
        assert!(snapshot["ip_local"].as_str().unwrap().parse::<IpAddr>().is_ok());
    }

    #[tokio::test]
    async fn test_health_metrics_are_percentages() {
        let probe = SystemProbe::new("1.1.0");

        let metrics = probe.health_metrics().await;
        for key in ["cpu_usage_percent", "memory_usage_percent", "disk_usage_percent"] {
            assert!(metrics.get(key).is_some(), "missing {}", key);
            assert_percent(&metrics[key]);
        }
    }

    #[test]
    fn test_controller_type() {
        assert_eq!(controller_type(Some("Raspberry Pi 4 Model B"), "aarch64"), "Raspberry Pi");
        assert_eq!(controller_type(None, "aarch64"), "Generic ARM Edge Device");
        assert_eq!(controller_type(None, "x86_64"), "Generic x86 Host");
    }

    #[test]
    fn test_disk_status_thresholds() {
        assert_eq!(disk_status(Some(40.5))["status"], "Pass");
        assert_eq!(disk_status(Some(95.0))["status"], "Critical");
        assert_eq!(disk_status(Some(95.0))["usage_percent"], 95.0);
        assert_eq!(disk_status(None)["status"], "Unknown");
    }

    #[test]
    fn test_mcu_candidates() {
        let ports = json!(["/dev/ttyTHS0", "/dev/ttyUSB0"]);
        assert_eq!(mcu_status(&ports)["candidates"], json!(["/dev/ttyUSB0"]));
        assert_eq!(mcu_status(&json!(["/dev/ttyTHS0"]))["status"], "Fail");
    }

    #[test]
    fn test_percent_used() {
        assert_eq!(percent_used(8_000, 2_000), Some(25.0));
        assert_eq!(percent_used(3, 1), Some(33.3));
        assert_eq!(percent_used(0, 0), None);
    }
}
