//! # Offline Transaction Repository
//!
//! Durable storage for deposits recorded while the device is offline.
//!
//! ## Transaction Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Offline Transaction Lifecycle                         │
//! │                                                                         │
//! │  1. CREATE (kiosk deposit while OFFLINE_GUEST)                         │
//! │     └── create(items, user_id)                                         │
//! │         ┌───────────────── SINGLE TRANSACTION ─────────────────┐       │
//! │         │ INSERT offline_transactions (status = 'pending')      │       │
//! │         │ INSERT offline_transaction_items × N (with position)  │       │
//! │         │ INSERT edge_activity_logs ('transaction_created')     │       │
//! │         └───────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  2. DRAIN (sync engine, after reconnect)                               │
//! │     └── pending() → oldest first, items in deposit order               │
//! │                                                                         │
//! │  3. CONFIRM                                                            │
//! │     └── mark_synced(ids) → status = 'synced', synced_at = now          │
//! │         (only rows still pending are touched, so repeats are no-ops)   │
//! │                                                                         │
//! │  4. PURGE (startup housekeeping)                                       │
//! │     └── purge_synced(days) → items go with their row (ON DELETE CASCADE)│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::activity::insert_log;
use rvm_core::validation::validate_items;
use rvm_core::{
    format_timestamp, new_session_id, now_timestamp, Transaction, TransactionItem,
    TransactionStatus,
};

/// Upper bound on ids bound into a single `IN (...)` list.
const MARK_SYNCED_CHUNK: usize = 500;

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    session_id: String,
    user_id: i64,
    status: TransactionStatus,
    timestamp: String,
    synced_at: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    transaction_id: i64,
    bottle_type: String,
    weight: f64,
    points: i64,
}

impl TransactionRow {
    fn into_transaction(self, items: Vec<TransactionItem>) -> Transaction {
        Transaction {
            id: self.id,
            session_id: self.session_id,
            user_id: self.user_id,
            status: self.status,
            timestamp: self.timestamp,
            synced_at: self.synced_at,
            items,
        }
    }
}

/// Repository for offline transactions and their items.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        TransactionRepository { pool, write_lock }
    }

    /// Persists a deposit and its items atomically.
    ///
    /// ## Arguments
    /// * `items` - Deposited items, stored in the given order
    /// * `user_id` - The cached system donation user id
    ///
    /// ## Returns
    /// The freshly minted `offline-<uuid>` session id.
    ///
    /// ## Errors
    /// * `DbError::NoUserId` - `user_id` is `None`; nothing is written
    /// * `DbError::Validation` - an item is out of range; nothing is written
    /// * any other variant - the write did not become durable
    pub async fn create(&self, items: &[TransactionItem], user_id: Option<i64>) -> DbResult<String> {
        let user_id = user_id.ok_or(DbError::NoUserId)?;
        validate_items(items)?;

        let session_id = new_session_id();
        let timestamp = now_timestamp();

        debug!(session_id = %session_id, items = items.len(), "Creating offline transaction");

        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let transaction_id = sqlx::query(
            r#"
            INSERT INTO offline_transactions (session_id, user_id, status, timestamp)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(TransactionStatus::Pending)
        .bind(&timestamp)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO offline_transaction_items
                    (transaction_id, position, bottle_type, weight, points)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(transaction_id)
            .bind(position as i64)
            .bind(&item.bottle_type)
            .bind(item.weight)
            .bind(item.points)
            .execute(&mut *tx)
            .await?;
        }

        let details = serde_json::json!({
            "session_id": session_id,
            "item_count": items.len(),
        })
        .to_string();
        insert_log(&mut *tx, "transaction_created", "success", Some(&details)).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(session_id = %session_id, user_id, "Offline transaction stored");
        Ok(session_id)
    }

    /// Returns every pending transaction, oldest first, items in deposit order.
    pub async fn pending(&self) -> DbResult<Vec<Transaction>> {
        // One read transaction so rows and items come from the same snapshot
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, session_id, user_id, status, timestamp, synced_at
            FROM offline_transactions
            WHERE status = 'pending'
            ORDER BY id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let item_rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT i.transaction_id, i.bottle_type, i.weight, i.points
            FROM offline_transaction_items i
            JOIN offline_transactions t ON t.id = i.transaction_id
            WHERE t.status = 'pending'
            ORDER BY i.transaction_id, i.position
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut items_by_tx: HashMap<i64, Vec<TransactionItem>> = HashMap::new();
        for row in item_rows {
            items_by_tx
                .entry(row.transaction_id)
                .or_default()
                .push(TransactionItem::new(row.bottle_type, row.weight, row.points));
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let items = items_by_tx.remove(&row.id).unwrap_or_default();
                row.into_transaction(items)
            })
            .collect())
    }

    /// Marks the given transactions synced and returns how many rows changed.
    ///
    /// Rows that are already synced keep their original `synced_at`, so
    /// calling this twice with the same ids is harmless. Empty input is a
    /// no-op.
    pub async fn mark_synced(&self, ids: &[i64]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let synced_at = now_timestamp();
        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let mut updated = 0;
        for chunk in ids.chunks(MARK_SYNCED_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "UPDATE offline_transactions SET status = 'synced', synced_at = ",
            );
            builder.push_bind(synced_at.clone());
            builder.push(" WHERE status = 'pending' AND id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            updated += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(requested = ids.len(), updated, "Marked transactions synced");
        Ok(updated)
    }

    /// Number of transactions waiting for upload.
    pub async fn pending_count(&self) -> DbResult<i64> {
        self.count_with_status(TransactionStatus::Pending).await
    }

    /// Number of transactions already confirmed by the backend.
    pub async fn synced_count(&self) -> DbResult<i64> {
        self.count_with_status(TransactionStatus::Synced).await
    }

    async fn count_with_status(&self, status: TransactionStatus) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM offline_transactions WHERE status = ?1")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Looks a transaction up by its session id.
    pub async fn get_by_session(&self, session_id: &str) -> DbResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, session_id, user_id, status, timestamp, synced_at
            FROM offline_transactions
            WHERE session_id = ?1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT transaction_id, bottle_type, weight, points
            FROM offline_transaction_items
            WHERE transaction_id = ?1
            ORDER BY position
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|item| TransactionItem::new(item.bottle_type, item.weight, item.points))
        .collect();

        Ok(Some(row.into_transaction(items)))
    }

    /// Deletes synced transactions confirmed more than `older_than_days` ago.
    ///
    /// Pending rows are never touched. Returns the number of deleted
    /// transactions.
    pub async fn purge_synced(&self, older_than_days: u32) -> DbResult<u64> {
        let cutoff = format_timestamp(Utc::now() - Duration::days(i64::from(older_than_days)));

        let _guard = self.write_lock.lock().await;
        let deleted = sqlx::query(
            r#"
            DELETE FROM offline_transactions
            WHERE status = 'synced' AND synced_at IS NOT NULL AND synced_at < ?1
            "#,
        )
        .bind(&cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted > 0 {
            info!(deleted, older_than_days, "Purged synced offline transactions");
        }
        Ok(deleted)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
