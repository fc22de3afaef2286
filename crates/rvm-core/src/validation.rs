//! # Validation Module
//!
//! Checks applied to deposit items before they reach the offline store.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Kiosk bridge (rvm-edge)                                      │
//! │  └── Missing fields get defaults ("unknown", 0.0, 0)                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Non-negative weight/points, finite weight, sane bottle_type       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite CHECK constraints                                     │
//! │  └── weight >= 0, points >= 0, status IN ('pending','synced')          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::TransactionItem;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted bottle type label.
pub const MAX_BOTTLE_TYPE_LEN: usize = 64;

/// Most items accepted in a single deposit session.
pub const MAX_ITEMS_PER_TRANSACTION: usize = 200;

/// Validates a single item.
///
/// ## Rules
/// - `bottle_type` must not be blank and at most 64 characters
/// - `weight` must be finite and `>= 0`
/// - `points` must be `>= 0`
///
/// ## Example
/// ```rust
/// use rvm_core::TransactionItem;
/// use rvm_core::validation::validate_item;
///
/// assert!(validate_item(&TransactionItem::new("PET", 12.0, 5)).is_ok());
/// assert!(validate_item(&TransactionItem::new("PET", -1.0, 5)).is_err());
/// ```
pub fn validate_item(item: &TransactionItem) -> ValidationResult<()> {
    if item.bottle_type.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "bottle_type".to_string(),
        });
    }

    if item.bottle_type.chars().count() > MAX_BOTTLE_TYPE_LEN {
        return Err(ValidationError::TooLong {
            field: "bottle_type".to_string(),
            max: MAX_BOTTLE_TYPE_LEN,
        });
    }

    if !item.weight.is_finite() {
        return Err(ValidationError::NotFinite {
            field: "weight".to_string(),
        });
    }

    if item.weight < 0.0 {
        return Err(ValidationError::Negative {
            field: "weight".to_string(),
        });
    }

    if item.points < 0 {
        return Err(ValidationError::Negative {
            field: "points".to_string(),
        });
    }

    Ok(())
}

/// Validates every item of a deposit and the item count.
///
/// An empty list is accepted: the kiosk may open and close a session without
/// depositing anything, and the backend still wants the session.
pub fn validate_items(items: &[TransactionItem]) -> ValidationResult<()> {
    if items.len() > MAX_ITEMS_PER_TRANSACTION {
        return Err(ValidationError::TooMany {
            field: "items".to_string(),
            max: MAX_ITEMS_PER_TRANSACTION,
        });
    }

    items.iter().try_for_each(validate_item)
}
