//! # Bulk Sync Wire Format
//!
//! Request and response bodies of `POST {base}/edge/sync-offline`.
//!
//! ```text
//! {"transactions": [
//!     {"session_id": "offline-…", "user_id": 7, "timestamp": "…Z",
//!      "items": [{"type": "PET", "weight": 12.0, "points": 5}]}
//! ]}
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{Transaction, TransactionItem};

/// Body of the bulk sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub transactions: Vec<SyncTransaction>,
}

impl SyncBatch {
    /// Builds a batch, preserving the order of `transactions`.
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        SyncBatch {
            transactions: transactions.iter().map(SyncTransaction::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// One transaction in a bulk sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTransaction {
    pub session_id: String,
    pub user_id: i64,
    pub timestamp: String,
    pub items: Vec<SyncItem>,
}

impl From<&Transaction> for SyncTransaction {
    fn from(tx: &Transaction) -> Self {
        SyncTransaction {
            session_id: tx.session_id.clone(),
            user_id: tx.user_id,
            timestamp: tx.timestamp.clone(),
            items: tx.items.iter().map(SyncItem::from).collect(),
        }
    }
}

/// One item in a bulk sync request. `bottle_type` travels as `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    #[serde(rename = "type")]
    pub bottle_type: String,
    pub weight: f64,
    pub points: i64,
}

impl From<&TransactionItem> for SyncItem {
    fn from(item: &TransactionItem) -> Self {
        SyncItem {
            bottle_type: item.bottle_type.clone(),
            weight: item.weight,
            points: item.points,
        }
    }
}

/// Fields of the bulk sync response this agent understands.
///
/// Both are optional. When `synced_session_ids` is present, only those
/// sessions are treated as confirmed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub synced_count: Option<i64>,
    #[serde(default)]
    pub synced_session_ids: Option<Vec<String>>,
}
