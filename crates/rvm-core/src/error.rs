//! # Error Types
//!
//! Domain-specific error types for rvm-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  rvm-core errors (this file)                                           │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  rvm-db errors (separate crate)                                        │
//! │  └── DbError          - Storage failures, missing donation user        │
//! │                                                                         │
//! │  rvm-edge errors (separate crate)                                      │
//! │  └── EdgeError        - Transport, sync, bridge, configuration         │
//! │                                                                         │
//! │  Flow: ValidationError → DbError → EdgeError → kiosk error code        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A session id does not have the `offline-<uuid v4>` shape.
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// An offline transaction was requested before the backend told us
    /// which account offline donations belong to.
    ///
    /// ## When This Occurs
    /// - Device booted without network and never completed a handshake
    /// - Backend policy has no donation user configured
    #[error("System donation user is not known yet")]
    NoUserId,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything is written, so a rejected deposit leaves no trace
/// in the offline store.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Value is NaN or infinite.
    #[error("{field} must be a finite number")]
    NotFinite { field: String },

    /// Collection exceeds its maximum size.
    #[error("{field} cannot have more than {max} entries")]
    TooMany { field: String, max: usize },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
