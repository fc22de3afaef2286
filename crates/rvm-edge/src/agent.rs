//! # Edge Agent
//!
//! Builds the runtime components and drives the control loop.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EdgeAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                          EdgeAgent                               │  │
//! │  │                                                                  │  │
//! │  │  loop {                                                          │  │
//! │  │    distance   = hardware.poll_bin_distance()                     │  │
//! │  │    bin_level  = bin_fill_percent(distance)                       │  │
//! │  │    commands   = driver.heartbeat(bin_level, discovery)           │  │
//! │  │    commands.for_each(handler.handle)                             │  │
//! │  │    sleep(poll 10s)  ─┐ each sleep ends early on shutdown         │  │
//! │  │    sleep(net 30s)   ─┘                                           │  │
//! │  │  }                                                               │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  controller ──reconnect──► tokio::spawn(sync_engine.sync())            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One heartbeat cycle is in flight at a time. Shutdown is only observed
//! between steps, so a running heartbeat always completes or times out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rvm_core::telemetry::bin_fill_percent;
use rvm_db::Database;

use crate::bridge::LocalBridge;
use crate::commands::{CommandHandler, RemoteCommand};
use crate::config::EdgeConfig;
use crate::controller::ConnectivityController;
use crate::driver::{DriverOptions, HandshakeInfo, ProtocolDriver};
use crate::error::{EdgeError, EdgeResult};
use crate::hardware::HardwareProbe;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::transport::HttpTransport;

// =============================================================================
// Agent Options
// =============================================================================

/// Loop timing.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub poll_interval: Duration,
    pub network_interval: Duration,
    /// Run a single cycle and return.
    pub once: bool,
}

impl AgentOptions {
    pub fn from_config(config: &EdgeConfig) -> Self {
        AgentOptions {
            poll_interval: config.poll_interval(),
            network_interval: config.network_interval(),
            once: false,
        }
    }
}

// =============================================================================
// Edge Agent
// =============================================================================

/// Owns the connected runtime components.
pub struct EdgeAgent {
    db: Database,
    controller: Arc<ConnectivityController>,
    sync: Arc<SyncEngine>,
    driver: Arc<ProtocolDriver>,
    hardware: Arc<dyn HardwareProbe>,
    commands: Arc<dyn CommandHandler>,
    options: AgentOptions,
}

impl EdgeAgent {
    /// Builds the controller, sync engine and protocol driver, and arranges
    /// for a sync on every reconnect.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: &EdgeConfig,
        db: Database,
        transport: Arc<dyn HttpTransport>,
        hardware: Arc<dyn HardwareProbe>,
        commands: Arc<dyn CommandHandler>,
    ) -> EdgeResult<Self> {
        let controller = Arc::new(ConnectivityController::new(
            config.controller.failure_threshold,
        ));
        let sync = Arc::new(SyncEngine::new(
            db.clone(),
            transport.clone(),
            config.server.sync_timeout(),
        ));
        let driver = Arc::new(ProtocolDriver::new(
            transport,
            controller.clone(),
            hardware.clone(),
            DriverOptions::from_config(config),
        ));

        sync_on_reconnect(&controller, sync.clone())?;

        Ok(EdgeAgent {
            db,
            controller,
            sync,
            driver,
            hardware,
            commands,
            options: AgentOptions::from_config(config),
        })
    }

    /// Overrides the loop timing (and `--once`).
    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn controller(&self) -> Arc<ConnectivityController> {
        self.controller.clone()
    }

    pub fn sync_engine(&self) -> Arc<SyncEngine> {
        self.sync.clone()
    }

    pub fn driver(&self) -> Arc<ProtocolDriver> {
        self.driver.clone()
    }

    /// A kiosk bridge sharing this agent's controller, store and sync engine.
    pub fn bridge(&self, config: &EdgeConfig) -> LocalBridge {
        LocalBridge::new(
            config.bridge.clone(),
            self.controller.clone(),
            self.db.clone(),
            self.sync.clone(),
        )
    }

    /// Handshakes until the backend accepts us.
    pub async fn handshake(&self, shutdown: &mut mpsc::Receiver<()>) -> EdgeResult<HandshakeInfo> {
        self.driver.handshake_until_success(shutdown).await
    }

    /// One cycle: poll, compute bin level, heartbeat, dispatch commands.
    pub async fn tick(&self) -> Vec<RemoteCommand> {
        let distance = self.hardware.poll_bin_distance().await;
        let bin_level = bin_fill_percent(distance);
        debug!(?distance, bin_level, "Hardware polled");

        let discovery = self.hardware.discovery_snapshot().await;
        let commands = self.driver.heartbeat(bin_level, discovery).await;

        for command in &commands {
            self.commands.handle(command);
        }
        commands
    }

    /// Runs the control loop until `shutdown` fires (or after one cycle with
    /// `once`).
    pub async fn run(&self, shutdown: &mut mpsc::Receiver<()>) -> EdgeResult<()> {
        info!(
            poll_secs = self.options.poll_interval.as_secs(),
            network_secs = self.options.network_interval.as_secs(),
            "Control loop starting"
        );

        loop {
            self.tick().await;

            if self.options.once {
                info!("Single cycle requested, leaving control loop");
                break;
            }

            if sleep_or_shutdown(self.options.poll_interval, shutdown).await
                || sleep_or_shutdown(self.options.network_interval, shutdown).await
            {
                info!("Control loop received shutdown signal");
                break;
            }
        }

        info!("Control loop stopped");
        Ok(())
    }
}

impl std::fmt::Debug for EdgeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeAgent")
            .field("controller", &self.controller)
            .field("options", &self.options)
            .finish()
    }
}

/// Returns true if shutdown fired before `duration` elapsed.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut mpsc::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.recv() => true,
    }
}

/// Spawns [`SyncEngine::sync`] on every OFFLINE_GUEST → ONLINE edge.
pub fn sync_on_reconnect(
    controller: &ConnectivityController,
    sync: Arc<SyncEngine>,
) -> EdgeResult<()> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| EdgeError::Internal(format!("No Tokio runtime: {}", e)))?;

    controller.register_reconnect(move |_change| {
        let sync = sync.clone();
        runtime.spawn(async move {
            match sync.sync().await {
                Ok(SyncOutcome::Synced { synced_count, marked }) => {
                    info!(synced_count, marked, "Reconnect sync finished")
                }
                Ok(SyncOutcome::Skipped { reason }) => {
                    debug!(reason = %reason, "Reconnect sync skipped")
                }
                Err(e) => warn!(error = %e, "Reconnect sync failed, will retry on next reconnect"),
            }
        });
        Ok(())
    });

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
