//! # rvm-edge: Connectivity, Store-and-Forward and Kiosk Bridge
//!
//! Runtime of the edge agent on a reverse-vending machine: decides whether the
//! device is online, buffers deposits while it is not, and reconciles them
//! with the backend when the connection comes back.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          rvm-edge Runtime                               │
//! │                                                                         │
//! │   Kiosk UI ◄──ws──► LocalBridge ──deposit──► rvm-db (offline store)    │
//! │                          │                        ▲                     │
//! │                          │ connection_lost        │ pending/mark_synced │
//! │                          ▼                        │                     │
//! │   EdgeAgent ──► ProtocolDriver ──signals──► ConnectivityController     │
//! │   (loop)         │ handshake                      │                     │
//! │                  │ heartbeat                      │ reconnect           │
//! │                  ▼                                ▼                     │
//! │             HttpTransport ◄──────────────── SyncEngine                  │
//! │                  │                                                      │
//! │                  ▼                                                      │
//! │            Backend API  (/edge/handshake, /edge/heartbeat,             │
//! │                          /edge/sync-offline)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`controller`] - ONLINE / OFFLINE_GUEST / TRANSITIONING with observers
//! - [`sync`] - Single-flight bulk upload of pending transactions
//! - [`driver`] - Handshake and heartbeat exchanges
//! - [`transport`] - Authenticated JSON POST (`reqwest`)
//! - [`hardware`] - Sensor/diagnostics collaborator and the Linux probe
//! - [`commands`] - Remote commands delivered with heartbeats
//! - [`bridge`] - Kiosk WebSocket + HTTP server (`axum`)
//! - [`agent`] - Component wiring and the control loop
//! - [`config`] - TOML configuration with env overrides
//! - [`error`] - Edge error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rvm_edge::{EdgeAgent, EdgeConfig, LoggingCommandHandler, ReqwestTransport, SystemProbe};
//!
//! let config = EdgeConfig::load(None)?;
//! let transport = Arc::new(ReqwestTransport::new(&config.server.base_url, &config.server.api_key)?);
//! let agent = EdgeAgent::new(&config, db, transport, Arc::new(SystemProbe::new("1.1.0")),
//!                            Arc::new(LoggingCommandHandler::new()))?;
//!
//! let bridge = agent.bridge(&config).start().await?;
//! agent.handshake(&mut shutdown_rx).await?;
//! agent.run(&mut shutdown_rx).await?;
//! bridge.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod hardware;
pub mod sync;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{sync_on_reconnect, AgentOptions, EdgeAgent};
pub use bridge::{BridgeHandle, BridgeState, LocalBridge};
pub use commands::{CommandAction, CommandHandler, LoggingCommandHandler, RemoteCommand};
pub use config::EdgeConfig;
pub use controller::{CallbackError, ConnectivityController};
pub use driver::{DriverOptions, HandshakeInfo, ProtocolDriver};
pub use error::{EdgeError, EdgeResult, TransportError};
pub use hardware::{HardwareProbe, SystemProbe};
pub use sync::{SyncEngine, SyncOutcome};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
