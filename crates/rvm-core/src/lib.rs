//! # rvm-core: Pure Domain Logic for the RVM Edge Agent
//!
//! This crate holds the rules of the edge agent that runs on a reverse-vending
//! machine controller. Everything here is a pure function or a plain data type.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RVM Edge Agent Architecture                      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  Kiosk UI (browser, local)                      │   │
//! │  │      deposit ──► status ──► pending count ──► sync now          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ WebSocket (port 8002)                  │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 rvm-edge (controller, sync, driver)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ rvm-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │  ┌─────────────┐ ┌─────────────┐ ┌───────────┐ ┌────────────┐  │   │
//! │  │  │connectivity │ │    types    │ │   wire    │ │   kiosk    │  │   │
//! │  │  │ state machine│ │ Transaction │ │ bulk sync │ │ UI messages│  │   │
//! │  │  └─────────────┘ └─────────────┘ └───────────┘ └────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    rvm-db (Offline Store)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`connectivity`] - ONLINE / OFFLINE_GUEST / TRANSITIONING state machine
//! - [`types`] - Offline transactions, items, activity log entries
//! - [`wire`] - Bulk sync request body sent to the backend
//! - [`kiosk`] - Messages exchanged with the local kiosk UI
//! - [`telemetry`] - Bin fill level math
//! - [`validation`] - Item validation rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use rvm_core::connectivity::{ConnectivityState, EdgeMode};
//! use chrono::Utc;
//!
//! let mut state = ConnectivityState::default();
//! assert_eq!(state.mode(), EdgeMode::Transitioning);
//!
//! let change = state.record_success(Utc::now());
//! assert_eq!(state.mode(), EdgeMode::Online);
//! assert!(change.is_some());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod connectivity;
pub mod error;
pub mod kiosk;
pub mod telemetry;
pub mod types;
pub mod validation;
pub mod wire;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use connectivity::{ConnectivityState, ConnectivityStatus, EdgeMode, ModeChange};
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Consecutive failed exchanges after which the device goes offline.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Prefix of every session id minted on the device while offline.
pub const SESSION_PREFIX: &str = "offline-";

/// Agent version reported in heartbeats when no other version is configured.
pub const DEFAULT_AGENT_VERSION: &str = "1.1.0";
