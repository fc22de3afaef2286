//! # Edge Error Types
//!
//! Error types for the edge runtime.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Edge Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Deposit path   │  │   Transport     │  │     Configuration       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  NoUserId       │  │  Transport      │  │  InvalidConfig          │ │
//! │  │  Storage        │  │  (folded into   │  │  InvalidUrl             │ │
//! │  │                 │  │  on_failure)    │  │  ConfigLoad/SaveFailed  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Advisory      │  │    Protocol     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  SyncInProgress │  │  Rejected       │  │  Bridge, Channel,       │ │
//! │  │  ShuttingDown   │  │  Serialization  │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport errors never escape the protocol driver: the driver turns them
//! into controller failure signals. The sync engine reports them to its
//! caller as a typed result.

use std::time::Duration;

use rvm_db::DbError;
use thiserror::Error;

/// Result type alias for edge operations.
pub type EdgeResult<T> = Result<T, EdgeError>;

/// Failure of one HTTP exchange with the backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete within its deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// DNS, connect or socket error.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The backend answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the JSON we expected.
    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// Short label used as the `event_type` suffix in the activity log.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Connection(_) => "connection",
            TransportError::Status { .. } => "status",
            TransportError::Decode(_) => "decode",
        }
    }
}

impl TransportError {
    /// Classifies a reqwest failure for a request sent with `timeout`.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}

/// Edge runtime error covering every failure the runtime reports upward.
#[derive(Debug, Error)]
pub enum EdgeError {
    // =========================================================================
    // Deposit Path
    // =========================================================================
    /// Offline deposit attempted before the donation user id is known.
    #[error("System not initialized: system donation user id unknown")]
    NoUserId,

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(DbError),

    // =========================================================================
    // Transport
    // =========================================================================
    /// An HTTP exchange with the backend failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Advisory: a sync is already running.
    #[error("Sync already in progress")]
    SyncInProgress,

    // =========================================================================
    // Configuration
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Protocol
    // =========================================================================
    /// The backend answered 2xx but did not report success.
    #[error("Backend rejected request: {0}")]
    Rejected(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal
    // =========================================================================
    /// The kiosk bridge could not start.
    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Edge agent is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

/// Keeps the precondition error apart from real storage faults.
impl From<DbError> for EdgeError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NoUserId => EdgeError::NoUserId,
            other => EdgeError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for EdgeError {
    fn from(err: serde_json::Error) -> Self {
        EdgeError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for EdgeError {
    fn from(err: url::ParseError) -> Self {
        EdgeError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for EdgeError {
    fn from(err: std::io::Error) -> Self {
        EdgeError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EdgeError {
    fn from(err: toml::de::Error) -> Self {
        EdgeError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EdgeError {
    fn from(err: toml::ser::Error) -> Self {
        EdgeError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl EdgeError {
    /// Returns true if the operation can simply be tried again later.
    ///
    /// ## Retryable Errors
    /// - Transport failures (network, timeout, 5xx)
    /// - A sync that was skipped because another one is running
    /// - A 2xx answer that did not report success
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EdgeError::Transport(_) | EdgeError::SyncInProgress | EdgeError::Rejected(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EdgeError::InvalidConfig(_)
                | EdgeError::InvalidUrl(_)
                | EdgeError::ConfigLoadFailed(_)
                | EdgeError::ConfigSaveFailed(_)
        )
    }
}
