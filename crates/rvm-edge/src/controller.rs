//! # Connectivity Controller
//!
//! Owns the process-wide connectivity state and tells observers when it
//! changes.
//!
//! ## Signal Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Connectivity Controller                             │
//! │                                                                         │
//! │  ProtocolDriver ──on_success(body)──┐                                  │
//! │  ProtocolDriver ──on_failure(why)───┼──► Mutex<ConnectivityState>      │
//! │  LocalBridge ─────on_transport_lost─┘          │                        │
//! │                                                 │ Some(ModeChange)      │
//! │                                  (lock released)▼                       │
//! │                            ┌──────────────────────────────┐            │
//! │                            │ mode-change callbacks        │ in order   │
//! │                            │ reconnect callbacks (edge    │ errors and │
//! │                            │   OFFLINE_GUEST → ONLINE)    │ panics are │
//! │                            └──────────────────────────────┘ logged     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mode is only ever changed by the three signals above. Callbacks fire once
//! per actual transition, never for a redundant success while ONLINE.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use rvm_core::{ConnectivityState, ConnectivityStatus, EdgeMode, ModeChange};

/// Error type observers may return. It is logged and discarded.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// An observer of mode transitions.
pub type ModeCallback = Arc<dyn Fn(&ModeChange) -> Result<(), CallbackError> + Send + Sync>;

#[derive(Debug, Default)]
struct ControllerInner {
    state: ConnectivityState,
    system_donation_user_id: Option<i64>,
}

/// Process-wide connectivity state machine with observer lists.
///
/// Construct one per process and share it behind an `Arc`.
pub struct ConnectivityController {
    inner: Mutex<ControllerInner>,
    threshold: u32,
    mode_change_callbacks: RwLock<Vec<ModeCallback>>,
    reconnect_callbacks: RwLock<Vec<ModeCallback>>,
}

impl std::fmt::Debug for ConnectivityController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityController")
            .field("status", &self.status())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl ConnectivityController {
    /// Creates a controller in TRANSITIONING.
    ///
    /// ## Arguments
    /// * `threshold` - consecutive failures before going OFFLINE_GUEST (min 1)
    pub fn new(threshold: u32) -> Self {
        ConnectivityController {
            inner: Mutex::new(ControllerInner::default()),
            threshold: threshold.max(1),
            mode_change_callbacks: RwLock::new(Vec::new()),
            reconnect_callbacks: RwLock::new(Vec::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Records a successful handshake or heartbeat.
    ///
    /// Resets the failure counter, caches `system_donation_user_id` when the
    /// response carries one, and fires callbacks if the mode changed.
    pub fn on_success(&self, response: &Value) -> Option<ModeChange> {
        let user_id = extract_donation_user_id(response);

        let change = {
            let mut inner = self.lock();
            if let Some(id) = user_id {
                if inner.system_donation_user_id != Some(id) {
                    info!(user_id = id, "Cached system donation user id");
                }
                inner.system_donation_user_id = Some(id);
            }
            inner.state.record_success(Utc::now())
        };

        match change {
            Some(change) => {
                info!(from = %change.from, to = %change.to, reason = %change.reason, "Mode changed");
                self.dispatch(&change);
                Some(change)
            }
            None => {
                debug!("Heartbeat success");
                None
            }
        }
    }

    /// Records a failed handshake or heartbeat.
    pub fn on_failure(&self, reason: &str) -> Option<ModeChange> {
        let (change, failures) = {
            let mut inner = self.lock();
            let change = inner.state.record_failure(self.threshold, Utc::now());
            (change, inner.state.consecutive_failures())
        };

        warn!(reason, failures, threshold = self.threshold, "Connectivity failure");

        if let Some(ref change) = change {
            warn!(from = %change.from, to = %change.to, reason = %change.reason, "Mode changed");
            self.dispatch(change);
        }
        change
    }

    /// Goes OFFLINE_GUEST immediately because the local real-time channel
    /// dropped.
    pub fn on_transport_lost(&self) -> Option<ModeChange> {
        let change = self.lock().state.force_offline(self.threshold, Utc::now());

        if let Some(ref change) = change {
            warn!(from = %change.from, reason = %change.reason, "Mode changed");
            self.dispatch(change);
        }
        change
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn mode(&self) -> EdgeMode {
        self.lock().state.mode()
    }

    pub fn is_online(&self) -> bool {
        self.mode() == EdgeMode::Online
    }

    pub fn is_offline(&self) -> bool {
        self.mode() == EdgeMode::OfflineGuest
    }

    /// The donation user learned from the backend, if any yet.
    pub fn system_donation_user_id(&self) -> Option<i64> {
        self.lock().system_donation_user_id
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Point-in-time snapshot.
    pub fn status(&self) -> ConnectivityStatus {
        let inner = self.lock();
        ConnectivityStatus::from_state(&inner.state, inner.system_donation_user_id)
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Registers a callback for every mode transition.
    pub fn register_mode_change<F>(&self, callback: F)
    where
        F: Fn(&ModeChange) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.mode_change_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Registers a callback for the OFFLINE_GUEST → ONLINE edge only.
    pub fn register_reconnect<F>(&self, callback: F)
    where
        F: Fn(&ModeChange) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.reconnect_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    fn dispatch(&self, change: &ModeChange) {
        invoke_all("mode_change", &self.mode_change_callbacks, change);
        if change.is_reconnect() {
            invoke_all("reconnect", &self.reconnect_callbacks, change);
        }
    }
}

impl Default for ConnectivityController {
    fn default() -> Self {
        Self::new(rvm_core::DEFAULT_FAILURE_THRESHOLD)
    }
}

/// Runs each callback in registration order, isolating failures.
fn invoke_all(kind: &str, callbacks: &RwLock<Vec<ModeCallback>>, change: &ModeChange) {
    // Snapshot so a callback may register further observers without deadlock
    let snapshot: Vec<ModeCallback> = callbacks
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    for (index, callback) in snapshot.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| callback(change))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(kind, index, error = %e, "Callback failed"),
            Err(_) => error!(kind, index, "Callback panicked"),
        }
    }
}

/// Finds `system_donation_user_id` at the top level, in `data`, or in
/// `data.policy`. Numeric strings are accepted.
pub fn extract_donation_user_id(response: &Value) -> Option<i64> {
    const KEY: &str = "system_donation_user_id";

    let data = response.get("data");
    let candidates = [
        response.get(KEY),
        data.and_then(|d| d.get(KEY)),
        data.and_then(|d| d.get("policy")).and_then(|p| p.get(KEY)),
    ];

    candidates.into_iter().flatten().find_map(|value| match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
