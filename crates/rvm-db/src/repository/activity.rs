//! # Activity Log Repository
//!
//! Append-only diagnostic trail. Business logic never reads it back; it is
//! surfaced through the sync status for operators.

use std::sync::Arc;

use sqlx::{SqliteExecutor, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::DbResult;
use rvm_core::{now_timestamp, ActivityLogEntry};

/// Repository for the `edge_activity_logs` table.
#[derive(Debug, Clone)]
pub struct ActivityLogRepository {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl ActivityLogRepository {
    /// Creates a new ActivityLogRepository.
    pub fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        ActivityLogRepository { pool, write_lock }
    }

    /// Appends one entry and returns its row id.
    ///
    /// ## Arguments
    /// * `event_type` - e.g. `sync_complete`, `sync_timeout`
    /// * `status` - `success`, `failed` or `error`
    /// * `details` - Free-form text, usually a small JSON object
    pub async fn log(&self, event_type: &str, status: &str, details: Option<&str>) -> DbResult<i64> {
        let _guard = self.write_lock.lock().await;
        insert_log(&self.pool, event_type, status, details).await
    }

    /// Returns up to `limit` entries, newest first.
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<ActivityLogEntry>> {
        let entries = sqlx::query_as::<_, ActivityLogEntry>(
            r#"
            SELECT id, event_type, status, details, created_at
            FROM edge_activity_logs
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

/// Inserts a log row on any executor, so writers can log inside their own
/// transaction.
pub(crate) async fn insert_log<'c, E>(
    executor: E,
    event_type: &str,
    status: &str,
    details: Option<&str>,
) -> DbResult<i64>
where
    E: SqliteExecutor<'c>,
{
    debug!(event_type, status, "Appending activity log");

    let result = sqlx::query(
        r#"
        INSERT INTO edge_activity_logs (event_type, status, details, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(event_type)
    .bind(status)
    .bind(details)
    .bind(now_timestamp())
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let activity = db.activity();

        activity.log("sync_failed", "failed", Some("HTTP 500")).await.unwrap();
        activity.log("sync_complete", "success", None).await.unwrap();

        let entries = activity.recent(5).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, "sync_complete");
        assert_eq!(entries[0].details, None);
        assert_eq!(entries[1].details.as_deref(), Some("HTTP 500"));
        assert!(entries[0].created_at.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_recent_respects_limit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let activity = db.activity();

        for _ in 0..7 {
            activity.log("sync_timeout", "error", None).await.unwrap();
        }

        assert_eq!(activity.recent(5).await.unwrap().len(), 5);
    }
}
