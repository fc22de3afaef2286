//! # Sync Engine
//!
//! Drains the offline store to the backend once connectivity returns.
//!
//! ## Sync Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Offline Sync Flow                               │
//! │                                                                         │
//! │  reconnect callback ──┐                                                 │
//! │  kiosk "sync_now" ────┼──► sync()                                       │
//! │                       │      │                                          │
//! │                       │      ├─ flag already set? ──► Skipped           │
//! │                       │      │                                          │
//! │                       │      ├─ 1. pending() (oldest first)             │
//! │                       │      │     empty ──► Synced { 0, 0 }            │
//! │                       │      │                                          │
//! │                       │      ├─ 2. POST /edge/sync-offline (30s)        │
//! │                       │      │     {"transactions": [...]}              │
//! │                       │      │                                          │
//! │                       │      ├─ 3a. 2xx  ──► mark_synced(confirmed ids) │
//! │                       │      │              log sync_complete           │
//! │                       │      │                                          │
//! │                       │      └─ 3b. error ─► nothing marked             │
//! │                       │                     log sync_failed/_timeout/   │
//! │                       │                         _error                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A concurrent caller never waits for the running sync: it gets
//! [`SyncOutcome::Skipped`] immediately.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use rvm_core::kiosk::{SyncResultInfo, SyncStatusInfo};
use rvm_core::Transaction;
use rvm_core::wire::{SyncBatch, SyncResponse};
use rvm_db::Database;

use crate::error::{EdgeError, EdgeResult, TransportError};
use crate::transport::HttpTransport;

/// Bulk upload endpoint, relative to the API root.
pub const SYNC_PATH: &str = "/edge/sync-offline";

/// Number of activity entries included in [`SyncEngine::status`].
const STATUS_LOG_LIMIT: i64 = 5;

// =============================================================================
// Outcome
// =============================================================================

/// Result of a [`SyncEngine::sync`] call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The upload finished (or there was nothing to upload).
    Synced {
        /// Count reported by the backend, or the submitted count if it did
        /// not report one.
        synced_count: i64,
        /// Rows actually flipped to `synced` locally.
        marked: u64,
    },
    /// Another sync was already running.
    Skipped { reason: String },
}

impl SyncOutcome {
    fn skipped_in_progress() -> Self {
        SyncOutcome::Skipped {
            reason: "sync_in_progress".to_string(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::Skipped { .. })
    }
}

impl From<SyncOutcome> for SyncResultInfo {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Synced { synced_count, .. } => SyncResultInfo {
                status: "success".to_string(),
                synced_count: Some(synced_count),
                reason: None,
                error: None,
            },
            SyncOutcome::Skipped { reason } => SyncResultInfo {
                status: "skipped".to_string(),
                synced_count: None,
                reason: Some(reason),
                error: None,
            },
        }
    }
}

/// Kiosk-facing summary of a sync attempt, including failures.
pub fn sync_result_info(result: EdgeResult<SyncOutcome>) -> SyncResultInfo {
    match result {
        Ok(outcome) => outcome.into(),
        Err(e) => SyncResultInfo {
            status: "error".to_string(),
            synced_count: None,
            reason: None,
            error: Some(e.to_string()),
        },
    }
}

// =============================================================================
// Single-Flight Guard
// =============================================================================

/// Clears the in-progress flag when dropped, including on early return.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Uploads pending offline transactions in one bulk request.
pub struct SyncEngine {
    db: Database,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    syncing: AtomicBool,
}

impl SyncEngine {
    /// Creates an engine.
    ///
    /// ## Arguments
    /// * `db` - Offline store handle
    /// * `transport` - Authenticated backend transport
    /// * `timeout` - Deadline for the bulk request (30s by default)
    pub fn new(db: Database, transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        SyncEngine {
            db,
            transport,
            timeout,
            syncing: AtomicBool::new(false),
        }
    }

    /// Returns true while an upload is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Uploads every pending transaction.
    ///
    /// ## Returns
    /// * `Ok(Synced)` - Uploaded (or nothing to upload)
    /// * `Ok(Skipped)` - Another sync is running
    /// * `Err(Transport)` - The upload failed; nothing was marked
    /// * `Err(Storage)` - The store could not be read or updated
    pub async fn sync(&self) -> EdgeResult<SyncOutcome> {
        let Some(_in_flight) = InFlight::acquire(&self.syncing) else {
            debug!("Sync already running, skipping");
            return Ok(SyncOutcome::skipped_in_progress());
        };

        let pending = self.db.transactions().pending().await?;
        if pending.is_empty() {
            debug!("No pending transactions to sync");
            return Ok(SyncOutcome::Synced {
                synced_count: 0,
                marked: 0,
            });
        }

        info!(pending = pending.len(), "Starting offline sync");

        let details = json!({
            "pending": pending.len(),
            "points": pending.iter().map(Transaction::total_points).sum::<i64>(),
        })
        .to_string();
        self.db
            .activity()
            .log("sync_start", "pending", Some(&details))
            .await?;

        let batch = SyncBatch::from_transactions(&pending);
        let body = serde_json::to_value(&batch)?;

        let response = match self
            .transport
            .post_json(SYNC_PATH, &body, self.timeout)
            .await
            .and_then(|response| response.error_for_status())
        {
            Ok(response) => response,
            Err(e) => {
                self.log_failure(&e, pending.len()).await;
                return Err(e.into());
            }
        };

        let reply = parse_sync_response(&response.body);

        let ids: Vec<i64> = match reply.synced_session_ids {
            Some(ref confirmed) => {
                let confirmed: HashSet<&str> = confirmed.iter().map(String::as_str).collect();
                pending
                    .iter()
                    .filter(|tx| confirmed.contains(tx.session_id.as_str()))
                    .map(|tx| tx.id)
                    .collect()
            }
            None => pending.iter().map(|tx| tx.id).collect(),
        };

        let marked = self.db.transactions().mark_synced(&ids).await?;
        let synced_count = reply.synced_count.unwrap_or(pending.len() as i64);

        if (marked as usize) < pending.len() {
            warn!(
                submitted = pending.len(),
                marked, "Backend confirmed only part of the batch"
            );
        }

        let details = json!({
            "submitted": pending.len(),
            "synced_count": synced_count,
            "marked": marked,
        })
        .to_string();
        self.db
            .activity()
            .log("sync_complete", "success", Some(&details))
            .await?;

        info!(synced_count, marked, "Offline sync complete");

        Ok(SyncOutcome::Synced {
            synced_count,
            marked,
        })
    }

    /// Summary for the kiosk and diagnostics.
    pub async fn status(&self) -> EdgeResult<SyncStatusInfo> {
        let pending_count = self.db.transactions().pending_count().await?;
        let recent_logs = self.db.activity().recent(STATUS_LOG_LIMIT).await?;

        Ok(SyncStatusInfo {
            is_syncing: self.is_syncing(),
            pending_count,
            recent_logs,
        })
    }

    async fn log_failure(&self, err: &TransportError, submitted: usize) {
        let (event_type, status) = match err {
            TransportError::Status { .. } => ("sync_failed", "failed"),
            TransportError::Timeout(_) => ("sync_timeout", "error"),
            _ => ("sync_error", "error"),
        };

        warn!(event_type, error = %err, submitted, "Offline sync failed");

        let details = json!({
            "kind": err.kind(),
            "error": err.to_string(),
            "submitted": submitted,
        })
        .to_string();

        // The transport error is what the caller needs; a log write failure
        // only gets reported here
        if let Err(e) = self.db.activity().log(event_type, status, Some(&details)).await {
            error!(error = %e, "Failed to record sync failure");
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("timeout", &self.timeout)
            .field("syncing", &self.is_syncing())
            .finish()
    }
}

/// Reads the optional response fields. Bodies that are not objects (or
/// carry unexpected field types) count as "no extra information".
fn parse_sync_response(body: &Value) -> SyncResponse {
    if !body.is_object() {
        return SyncResponse::default();
    }
    serde_json::from_value(body.clone()).unwrap_or_else(|e| {
        warn!(error = %e, "Unrecognized sync response fields, assuming full batch");
        SyncResponse::default()
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;
    use crate::transport::HttpResponse;
    use async_trait::async_trait;
    use rvm_core::TransactionItem;
    use rvm_db::DbConfig;
    use tokio::sync::Notify;

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn items() -> Vec<TransactionItem> {
        vec![TransactionItem::new("PET", 12.0, 5)]
    }

    fn engine(db: &Database, transport: Arc<dyn HttpTransport>) -> SyncEngine {
        SyncEngine::new(db.clone(), transport, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_empty_store_is_success_without_request() {
        let db = setup().await;
        let transport = Arc::new(ScriptedTransport::new());
        let engine = engine(&db, transport.clone());

        let outcome = engine.sync().await.unwrap();

        assert_eq!(outcome, SyncOutcome::Synced { synced_count: 0, marked: 0 });
        assert!(transport.requests().is_empty());
        assert!(db.activity().recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_success_marks_submitted_batch() {
        let db = setup().await;
        let first = db.transactions().create(&items(), Some(7)).await.unwrap();
        let second = db.transactions().create(&items(), Some(7)).await.unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        transport.ok(json!({"status": "success", "synced_count": 2}));
        let engine = engine(&db, transport.clone());

        let outcome = engine.sync().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { synced_count: 2, marked: 2 });
        assert_eq!(db.transactions().pending_count().await.unwrap(), 0);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, SYNC_PATH);
        let sent = &requests[0].1["transactions"];
        assert_eq!(sent[0]["session_id"], first.as_str());
        assert_eq!(sent[1]["session_id"], second.as_str());
        assert_eq!(sent[0]["items"][0]["type"], "PET");

        let logs = db.activity().recent(1).await.unwrap();
        assert_eq!(logs[0].event_type, "sync_complete");
        assert_eq!(logs[0].status, "success");
    }

    #[tokio::test]
    async fn test_missing_synced_count_uses_submitted() {
        let db = setup().await;
        db.transactions().create(&items(), Some(7)).await.unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(Ok(HttpResponse::new(200, Value::Null)));

        let outcome = engine(&db, transport).sync().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { synced_count: 1, marked: 1 });
    }

    #[tokio::test]
    async fn test_partial_confirmation_marks_only_listed_sessions() {
        let db = setup().await;
        let confirmed = db.transactions().create(&items(), Some(7)).await.unwrap();
        let rejected = db.transactions().create(&items(), Some(7)).await.unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        transport.ok(json!({"synced_count": 1, "synced_session_ids": [confirmed]}));

        let outcome = engine(&db, transport).sync().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { synced_count: 1, marked: 1 });

        let pending = db.transactions().pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].session_id, rejected);
    }

    #[tokio::test]
    async fn test_http_error_leaves_everything_pending() {
        let db = setup().await;
        db.transactions().create(&items(), Some(7)).await.unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(Ok(HttpResponse::new(500, json!("boom"))));

        let err = engine(&db, transport).sync().await.unwrap_err();
        assert!(matches!(err, EdgeError::Transport(TransportError::Status { status: 500, .. })));
        assert!(err.is_retryable());
        assert_eq!(db.transactions().pending_count().await.unwrap(), 1);

        let logs = db.activity().recent(1).await.unwrap();
        assert_eq!(logs[0].event_type, "sync_failed");
        assert_eq!(logs[0].status, "failed");
    }

    #[tokio::test]
    async fn test_failure_kinds_are_logged() {
        let db = setup().await;
        db.transactions().create(&items(), Some(7)).await.unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply(Err(TransportError::Timeout(Duration::from_secs(30))))
            .reply(Err(TransportError::Connection("refused".into())));
        let engine = engine(&db, transport);

        assert!(engine.sync().await.is_err());
        assert!(engine.sync().await.is_err());

        let events: Vec<String> = db
            .activity()
            .recent(4)
            .await
            .unwrap()
            .into_iter()
            .map(|log| log.event_type)
            .collect();
        assert_eq!(events, ["sync_error", "sync_start", "sync_timeout", "sync_start"]);
        assert_eq!(db.transactions().pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sync_start_is_logged_before_upload() {
        let db = setup().await;
        db.transactions().create(&items(), Some(7)).await.unwrap();
        db.transactions()
            .create(&[TransactionItem::new("CAN", 15.0, 3)], Some(7))
            .await
            .unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        transport.ok(json!({"synced_count": 2}));
        let engine = engine(&db, transport);
        engine.sync().await.unwrap();

        let logs = db.activity().recent(2).await.unwrap();
        assert_eq!(logs[0].event_type, "sync_complete");
        assert_eq!(logs[1].event_type, "sync_start");
        assert_eq!(logs[1].status, "pending");

        let details: Value = serde_json::from_str(logs[1].details.as_deref().unwrap()).unwrap();
        assert_eq!(details, json!({"pending": 2, "points": 8}));
    }

    #[tokio::test]
    async fn test_failed_sync_is_retried_with_same_sessions() {
        let db = setup().await;
        let session = db.transactions().create(&items(), Some(7)).await.unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply(Err(TransportError::Connection("refused".into())))
            .ok(json!({"synced_count": 1}));
        let engine = engine(&db, transport.clone());

        assert!(engine.sync().await.is_err());
        assert!(!engine.is_syncing());
        engine.sync().await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].1, requests[1].1);
        assert_eq!(requests[1].1["transactions"][0]["session_id"], session.as_str());
        assert_eq!(db.transactions().pending_count().await.unwrap(), 0);
    }

    /// Blocks inside `post_json` until released.
    struct GatedTransport {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl HttpTransport for GatedTransport {
        async fn post_json(
            &self,
            _path: &str,
            _body: &Value,
            _timeout: Duration,
        ) -> Result<HttpResponse, TransportError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(HttpResponse::new(200, json!({"synced_count": 1})))
        }
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_skipped() {
        let db = setup().await;
        db.transactions().create(&items(), Some(7)).await.unwrap();

        let transport = Arc::new(GatedTransport {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let engine = Arc::new(engine(&db, transport.clone()));

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync().await })
        };
        transport.entered.notified().await;
        assert!(engine.is_syncing());

        let second = engine.sync().await.unwrap();
        assert!(second.is_skipped());

        transport.release.notify_one();
        let first = running.await.unwrap().unwrap();
        assert_eq!(first, SyncOutcome::Synced { synced_count: 1, marked: 1 });
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_status_reports_pending_and_logs() {
        let db = setup().await;
        db.transactions().create(&items(), Some(7)).await.unwrap();

        let engine = engine(&db, Arc::new(ScriptedTransport::new()));
        let status = engine.status().await.unwrap();

        assert!(!status.is_syncing);
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.recent_logs[0].event_type, "transaction_created");
    }

    #[test]
    fn test_result_info_mapping() {
        let info = sync_result_info(Ok(SyncOutcome::skipped_in_progress()));
        assert_eq!(info.status, "skipped");
        assert_eq!(info.reason.as_deref(), Some("sync_in_progress"));

        let info = sync_result_info(Err(EdgeError::Transport(TransportError::Connection(
            "refused".into(),
        ))));
        assert_eq!(info.status, "error");
        assert!(info.error.unwrap().contains("refused"));
    }
}
