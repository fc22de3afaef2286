//! # Connectivity State Machine
//!
//! The pure half of the connectivity controller: which mode the device is in,
//! and which signal moves it where. Locking, callbacks and logging live in
//! `rvm-edge`; this module only decides.
//!
//! ## Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Connectivity State Machine                          │
//! │                                                                         │
//! │                     ┌────────────────┐                                  │
//! │        boot ───────►│ TRANSITIONING  │                                  │
//! │                     └───┬────────┬───┘                                  │
//! │              success    │        │  failures reach threshold            │
//! │                         ▼        ▼                                      │
//! │              ┌──────────┐        ┌───────────────┐                      │
//! │              │  ONLINE  │───────►│ OFFLINE_GUEST │                      │
//! │              │          │ thresh │               │                      │
//! │              │          │ or lost│               │                      │
//! │              │          │◄───────│               │                      │
//! │              └──────────┘ success└───────────────┘                      │
//! │                          (reconnect edge: wakes the sync engine)        │
//! │                                                                         │
//! │  Nothing ever re-enters TRANSITIONING.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Edge Mode
// =============================================================================

/// Coarse connectivity mode, as shown to the kiosk UI and the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// Backend reachable; deposits go straight to the server.
    Online,
    /// Backend unreachable; deposits are stored locally.
    OfflineGuest,
    /// Booting, no heartbeat outcome yet.
    Transitioning,
}

impl EdgeMode {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeMode::Online => "online",
            EdgeMode::OfflineGuest => "offline_guest",
            EdgeMode::Transitioning => "transitioning",
        }
    }
}

impl std::fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Mode Change
// =============================================================================

/// An actual transition between two different modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ModeChange {
    pub from: EdgeMode,
    pub to: EdgeMode,
    pub reason: String,
}

impl ModeChange {
    fn new(from: EdgeMode, to: EdgeMode, reason: impl Into<String>) -> Self {
        ModeChange {
            from,
            to,
            reason: reason.into(),
        }
    }

    /// Returns true for the OFFLINE_GUEST → ONLINE edge.
    pub fn is_reconnect(&self) -> bool {
        self.from == EdgeMode::OfflineGuest && self.to == EdgeMode::Online
    }
}

// =============================================================================
// Connectivity State
// =============================================================================

/// Connectivity state, one variant per mode.
///
/// Each variant carries only what is meaningful in that mode:
/// - `Transitioning` has seen no success yet, so it has no success time.
/// - `Online` always has a last success time.
/// - `OfflineGuest` knows when it went offline and may remember the last
///   success from before the outage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityState {
    Transitioning {
        consecutive_failures: u32,
    },
    Online {
        last_success: DateTime<Utc>,
        consecutive_failures: u32,
    },
    OfflineGuest {
        consecutive_failures: u32,
        since: DateTime<Utc>,
        last_success: Option<DateTime<Utc>>,
    },
}

impl Default for ConnectivityState {
    fn default() -> Self {
        ConnectivityState::Transitioning {
            consecutive_failures: 0,
        }
    }
}

impl ConnectivityState {
    /// Returns the coarse mode.
    pub fn mode(&self) -> EdgeMode {
        match self {
            ConnectivityState::Transitioning { .. } => EdgeMode::Transitioning,
            ConnectivityState::Online { .. } => EdgeMode::Online,
            ConnectivityState::OfflineGuest { .. } => EdgeMode::OfflineGuest,
        }
    }

    /// Failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        match self {
            ConnectivityState::Transitioning {
                consecutive_failures,
            }
            | ConnectivityState::Online {
                consecutive_failures,
                ..
            }
            | ConnectivityState::OfflineGuest {
                consecutive_failures,
                ..
            } => *consecutive_failures,
        }
    }

    /// Time of the most recent successful exchange, if any.
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self {
            ConnectivityState::Transitioning { .. } => None,
            ConnectivityState::Online { last_success, .. } => Some(*last_success),
            ConnectivityState::OfflineGuest { last_success, .. } => *last_success,
        }
    }

    /// Records a successful heartbeat or handshake.
    ///
    /// ## Returns
    /// * `Some(change)` - the mode changed (TRANSITIONING or OFFLINE_GUEST → ONLINE)
    /// * `None` - already ONLINE; only the counter and time were refreshed
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Option<ModeChange> {
        let from = self.mode();

        *self = ConnectivityState::Online {
            last_success: now,
            consecutive_failures: 0,
        };

        match from {
            EdgeMode::Online => None,
            EdgeMode::Transitioning => Some(ModeChange::new(
                from,
                EdgeMode::Online,
                "Initial connection established",
            )),
            EdgeMode::OfflineGuest => {
                Some(ModeChange::new(from, EdgeMode::Online, "Connection restored"))
            }
        }
    }

    /// Records a failed heartbeat or handshake.
    ///
    /// The mode flips to OFFLINE_GUEST exactly when the counter first reaches
    /// `threshold`. Further failures while offline only bump the counter.
    pub fn record_failure(&mut self, threshold: u32, now: DateTime<Utc>) -> Option<ModeChange> {
        let from = self.mode();
        let failures = self.consecutive_failures().saturating_add(1);
        let last_success = self.last_success();

        match self {
            ConnectivityState::OfflineGuest {
                consecutive_failures,
                ..
            } => {
                *consecutive_failures = failures;
                None
            }
            ConnectivityState::Transitioning {
                consecutive_failures,
            }
            | ConnectivityState::Online {
                consecutive_failures,
                ..
            } => {
                if failures < threshold {
                    *consecutive_failures = failures;
                    return None;
                }

                *self = ConnectivityState::OfflineGuest {
                    consecutive_failures: failures,
                    since: now,
                    last_success,
                };

                Some(ModeChange::new(
                    from,
                    EdgeMode::OfflineGuest,
                    format!("Connection lost after {} failures", failures),
                ))
            }
        }
    }

    /// Forces OFFLINE_GUEST because the local real-time channel dropped.
    ///
    /// The counter is raised to `threshold`, so only a success brings the
    /// device back.
    pub fn force_offline(&mut self, threshold: u32, now: DateTime<Utc>) -> Option<ModeChange> {
        let from = self.mode();
        let failures = self.consecutive_failures().max(threshold);
        let last_success = self.last_success();

        if let ConnectivityState::OfflineGuest {
            consecutive_failures,
            ..
        } = self
        {
            *consecutive_failures = failures;
            return None;
        }

        *self = ConnectivityState::OfflineGuest {
            consecutive_failures: failures,
            since: now,
            last_success,
        };

        Some(ModeChange::new(
            from,
            EdgeMode::OfflineGuest,
            "Local transport disconnected",
        ))
    }
}

// =============================================================================
// Status Snapshot
// =============================================================================

/// Point-in-time view of the controller, for status endpoints and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConnectivityStatus {
    pub mode: EdgeMode,
    pub is_online: bool,
    pub system_donation_user_id: Option<i64>,
    #[ts(as = "Option<String>")]
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl ConnectivityStatus {
    /// Builds a snapshot from a state and the cached donation user.
    pub fn from_state(state: &ConnectivityState, system_donation_user_id: Option<i64>) -> Self {
        let mode = state.mode();
        ConnectivityStatus {
            mode,
            is_online: mode == EdgeMode::Online,
            system_donation_user_id,
            last_success: state.last_success(),
            consecutive_failures: state.consecutive_failures(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
