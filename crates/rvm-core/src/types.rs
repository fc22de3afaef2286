//! # Domain Types
//!
//! Offline transactions and the diagnostic trail kept next to them.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐        ┌─────────────────────┐                │
//! │  │    Transaction      │ 1    * │  TransactionItem    │                │
//! │  │  ─────────────────  │───────►│  ─────────────────  │                │
//! │  │  id (local rowid)   │        │  bottle_type        │                │
//! │  │  session_id         │        │  weight (g, ≥ 0)    │                │
//! │  │  user_id            │        │  points (≥ 0)       │                │
//! │  │  status             │        └─────────────────────┘                │
//! │  │  timestamp (…Z)     │                                                │
//! │  │  synced_at          │        ┌─────────────────────┐                │
//! │  └─────────────────────┘        │ TransactionStatus   │                │
//! │                                 │  Pending ──► Synced │ (one-way)      │
//! │  ┌─────────────────────┐        └─────────────────────┘                │
//! │  │  ActivityLogEntry   │  append-only, observability only              │
//! │  └─────────────────────┘                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every transaction has:
//! - `id`: local integer row id, used for `mark_synced` and ordering
//! - `session_id`: `offline-<uuid v4>`, globally unique, sent to the backend

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::SESSION_PREFIX;

// =============================================================================
// Transaction Status
// =============================================================================

/// Upload state of an offline transaction.
///
/// The only legal transition is `Pending → Synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Stored locally, waiting for the backend.
    #[default]
    Pending,
    /// Confirmed by the backend.
    Synced,
}

impl TransactionStatus {
    /// Returns the database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Synced => "synced",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Transaction Item
// =============================================================================

/// One bottle accepted by the machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransactionItem {
    /// Classifier label ("PET", "ALU", "unknown", ...).
    pub bottle_type: String,
    /// Measured weight in grams.
    pub weight: f64,
    /// Points credited for this item.
    pub points: i64,
}

impl TransactionItem {
    /// Creates an item.
    pub fn new(bottle_type: impl Into<String>, weight: f64, points: i64) -> Self {
        TransactionItem {
            bottle_type: bottle_type.into(),
            weight,
            points,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A deposit recorded while the device was offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Transaction {
    /// Local row id (monotonic, creation order).
    pub id: i64,
    /// `offline-<uuid v4>`, minted once at creation.
    pub session_id: String,
    /// Account the donation is attributed to.
    pub user_id: i64,
    pub status: TransactionStatus,
    /// Creation time, UTC ISO-8601 with trailing `Z`. Stored verbatim.
    pub timestamp: String,
    /// Set exactly once, when the backend confirms the upload.
    pub synced_at: Option<String>,
    /// Items in the order they were deposited.
    pub items: Vec<TransactionItem>,
}

impl Transaction {
    /// Total points across all items.
    pub fn total_points(&self) -> i64 {
        self.items.iter().map(|item| item.points).sum()
    }

    /// Returns true while the transaction still waits for upload.
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

// =============================================================================
// Activity Log
// =============================================================================

/// One line of the local diagnostic trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ActivityLogEntry {
    pub id: i64,
    /// e.g. `transaction_created`, `sync_start`, `sync_complete`, `sync_timeout`.
    pub event_type: String,
    /// `success`, `pending`, `failed` or `error`.
    pub status: String,
    pub details: Option<String>,
    pub created_at: String,
}

// =============================================================================
// Session Ids & Timestamps
// =============================================================================

/// Mints a fresh `offline-<uuid v4>` session id.
pub fn new_session_id() -> String {
    format!("{}{}", SESSION_PREFIX, Uuid::new_v4())
}

/// Returns true if `session_id` is `offline-` followed by a hyphenated UUID v4.
///
/// ## Example
/// ```rust
/// use rvm_core::types::{is_valid_session_id, new_session_id};
///
/// assert!(is_valid_session_id(&new_session_id()));
/// assert!(!is_valid_session_id("offline-123"));
/// assert!(!is_valid_session_id("online-6f1c8a52-5f7e-4c1d-9f39-0c5e0e9d7a11"));
/// ```
pub fn is_valid_session_id(session_id: &str) -> bool {
    let Some(rest) = session_id.strip_prefix(SESSION_PREFIX) else {
        return false;
    };

    if rest.len() != 36 {
        return false;
    }

    Uuid::parse_str(rest)
        .map(|uuid| uuid.get_version_num() == 4)
        .unwrap_or(false)
}

/// Formats a UTC instant as ISO-8601 with microseconds and a trailing `Z`.
///
/// Every timestamp this agent stores goes through here, so stored values
/// compare correctly as plain strings.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time, formatted by [`format_timestamp`].
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

// =============================================================================
// Unit Tests
// =============================================================================
