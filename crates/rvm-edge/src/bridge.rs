//! # Local Kiosk Bridge
//!
//! HTTP + WebSocket server the on-device kiosk UI talks to.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiosk Bridge (Axum)                              │
//! │                                                                         │
//! │  GET /health      ──► {"status":"ok","mode":...}                       │
//! │  GET /api/status  ──► {mode, is_online, pending_transactions}          │
//! │  GET /ws          ──► WebSocket upgrade                                 │
//! │                          │                                              │
//! │                          ▼                                              │
//! │                 ┌─────────────────┐    status on connect                │
//! │                 │ per-connection  │◄── broadcast on every mode change   │
//! │                 │ handler         │                                     │
//! │                 └────────┬────────┘                                     │
//! │                          │ KioskRequest                                 │
//! │        ┌─────────────────┼──────────────────┬────────────────┐          │
//! │        ▼                 ▼                  ▼                ▼          │
//! │   deposit           get_status /       sync_now /      connection_lost  │
//! │   (OFFLINE_GUEST    get_pending        get_sync_status  → controller    │
//! │    only) → store                       → SyncEngine       offline       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every request frame gets exactly one reply frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use rvm_core::kiosk::{DepositErrorCode, DepositItem, KioskMessage, KioskRequest, KioskStatus};
use rvm_core::{now_timestamp, EdgeMode, TransactionItem};
use rvm_db::Database;

use crate::config::BridgeConfig;
use crate::controller::{CallbackError, ConnectivityController};
use crate::error::{EdgeError, EdgeResult};
use crate::sync::{sync_result_info, SyncEngine};

// =============================================================================
// Constants
// =============================================================================

/// Ping interval to keep kiosk connections alive.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum frame size (256KB); a deposit is a few hundred bytes.
const MAX_MESSAGE_SIZE: usize = 256 * 1024;

// =============================================================================
// Bridge State
// =============================================================================

/// State shared by all connections.
pub struct BridgeState {
    controller: Arc<ConnectivityController>,
    db: Database,
    sync: Arc<SyncEngine>,
    broadcast_tx: broadcast::Sender<KioskMessage>,
    clients: AtomicUsize,
}

impl BridgeState {
    pub fn new(controller: Arc<ConnectivityController>, db: Database, sync: Arc<SyncEngine>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        BridgeState {
            controller,
            db,
            sync,
            broadcast_tx,
            clients: AtomicUsize::new(0),
        }
    }

    /// Pending count, or 0 (logged) when the store cannot answer.
    async fn pending_count(&self) -> i64 {
        match self.db.transactions().pending_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Could not count pending transactions");
                0
            }
        }
    }

    pub async fn kiosk_status(&self) -> KioskStatus {
        KioskStatus::new(self.controller.mode(), self.pending_count().await)
    }

    /// Sends the current status to every connected kiosk.
    pub async fn broadcast_status(&self) {
        let status = KioskMessage::Status {
            data: self.kiosk_status().await,
        };
        // No receivers is fine
        let _ = self.broadcast_tx.send(status);
    }

    /// Answers one kiosk request.
    pub async fn handle_request(&self, request: KioskRequest) -> KioskMessage {
        match request {
            KioskRequest::Deposit { items } => self.handle_deposit(items).await,
            KioskRequest::GetStatus => KioskMessage::Status {
                data: self.kiosk_status().await,
            },
            KioskRequest::GetPending => KioskMessage::PendingInfo {
                count: self.pending_count().await,
            },
            KioskRequest::GetSyncStatus => match self.sync.status().await {
                Ok(data) => KioskMessage::SyncStatus { data },
                Err(e) => KioskMessage::Error {
                    error: e.to_string(),
                },
            },
            KioskRequest::SyncNow => {
                info!("Manual sync requested by kiosk");
                let data = sync_result_info(self.sync.sync().await);
                KioskMessage::SyncResult { data }
            }
            KioskRequest::ConnectionLost => {
                warn!("Kiosk reported lost connection");
                self.controller.on_transport_lost();
                KioskMessage::Status {
                    data: self.kiosk_status().await,
                }
            }
            KioskRequest::Ping { timestamp } => KioskMessage::Pong {
                timestamp: timestamp.unwrap_or_else(|| Value::String(now_timestamp())),
            },
        }
    }

    /// Parses a text frame and answers it.
    ///
    /// A `deposit` frame always gets `deposit_ack` or `deposit_error`, even
    /// when its items cannot be read.
    pub async fn handle_text(&self, text: &str) -> KioskMessage {
        let parsed = serde_json::from_str::<Value>(text)
            .map_err(|e| {
                debug!(error = %e, "Invalid kiosk message");
                None
            })
            .and_then(KioskRequest::from_value);

        match parsed {
            Ok(request) => self.handle_request(request).await,
            Err(Some(e)) => {
                let user_id = match self.deposit_user() {
                    Ok(user_id) => user_id,
                    Err(reply) => return reply,
                };
                warn!(user_id, error = %e, "Offline deposit has unreadable items");
                KioskMessage::deposit_error(DepositErrorCode::StorageFailed)
            }
            Err(None) => {
                debug!("Unknown kiosk request");
                KioskMessage::invalid_json()
            }
        }
    }

    /// Donation user for an offline deposit, or the refusal to send back.
    fn deposit_user(&self) -> Result<i64, KioskMessage> {
        if self.controller.mode() != EdgeMode::OfflineGuest {
            return Err(KioskMessage::deposit_error(DepositErrorCode::UseServer));
        }

        self.controller.system_donation_user_id().ok_or_else(|| {
            warn!("Offline deposit refused: donation user unknown");
            KioskMessage::deposit_error(DepositErrorCode::NoUserId)
        })
    }

    /// Stores a deposit locally, but only while OFFLINE_GUEST.
    async fn handle_deposit(&self, items: Vec<DepositItem>) -> KioskMessage {
        let user_id = match self.deposit_user() {
            Ok(user_id) => user_id,
            Err(reply) => return reply,
        };

        let items: Vec<TransactionItem> = items.into_iter().map(Into::into).collect();

        match self.db.transactions().create(&items, Some(user_id)).await {
            Ok(session_id) => {
                info!(session_id = %session_id, items = items.len(), "Offline deposit stored");
                self.broadcast_status().await;
                KioskMessage::deposit_ack(session_id)
            }
            Err(e) => match EdgeError::from(e) {
                EdgeError::NoUserId => KioskMessage::deposit_error(DepositErrorCode::NoUserId),
                other => {
                    error!(error = %other, "Offline deposit failed");
                    KioskMessage::deposit_error(DepositErrorCode::StorageFailed)
                }
            },
        }
    }
}

// =============================================================================
// Bridge Server
// =============================================================================

/// The kiosk-facing server.
pub struct LocalBridge {
    config: BridgeConfig,
    state: Arc<BridgeState>,
}

/// Handle for controlling a running bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    state: Arc<BridgeState>,
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl BridgeHandle {
    /// Address the server actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn broadcast_status(&self) {
        self.state.broadcast_status().await
    }

    /// Stops accepting connections and lets open ones finish.
    pub async fn shutdown(&self) -> EdgeResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EdgeError::ChannelError("Bridge shutdown channel closed".into()))
    }
}

impl LocalBridge {
    pub fn new(
        config: BridgeConfig,
        controller: Arc<ConnectivityController>,
        db: Database,
        sync: Arc<SyncEngine>,
    ) -> Self {
        let state = Arc::new(BridgeState::new(controller, db, sync));
        LocalBridge { config, state }
    }

    /// Binds, subscribes to mode changes and serves in the background.
    pub async fn start(self) -> EdgeResult<BridgeHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        // Mode changes can be signalled from any thread. One task drains
        // them in order so kiosks never see an older mode last.
        let (changed_tx, mut changed_rx) = mpsc::unbounded_channel::<EdgeMode>();
        self.state.controller.register_mode_change(move |change| {
            changed_tx
                .send(change.to)
                .map_err(|_| CallbackError::from("kiosk broadcaster stopped"))
        });

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(mode) = changed_rx.recv().await {
                debug!(mode = %mode, "Broadcasting mode change to kiosks");
                state.broadcast_status().await;
            }
        });

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/api/status", get(status_handler))
            .with_state(self.state.clone());

        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| EdgeError::Bridge(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| EdgeError::Bridge(e.to_string()))?;

        info!(addr = %local_addr, "Kiosk bridge started");

        tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                info!("Kiosk bridge shutting down");
            })
            .await;

            if let Err(e) = served {
                error!(error = %e, "Kiosk bridge stopped with error");
            }
        });

        Ok(BridgeHandle {
            state: self.state,
            local_addr,
            shutdown_tx,
        })
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "mode": state.controller.mode(),
    }))
}

async fn status_handler(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    Json(json!({
        "mode": state.controller.mode(),
        "is_online": state.controller.is_online(),
        "pending_transactions": state.pending_count().await,
    }))
}

// =============================================================================
// WebSocket Handler
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    info!(addr = %addr, "Kiosk connected");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Serializes a reply into a text frame.
fn to_frame(message: &KioskMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!(error = %e, "Failed to serialize kiosk message");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<BridgeState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let clients = state.clients.fetch_add(1, Ordering::AcqRel) + 1;
    debug!(addr = %addr, clients, "Kiosk socket open");

    // Subscribe first so no mode change slips in after the greeting
    let mut broadcast_rx = state.broadcast_tx.subscribe();

    // Greet with the current status
    let greeting = KioskMessage::Status {
        data: state.kiosk_status().await,
    };
    if let Some(frame) = to_frame(&greeting) {
        if sender.send(frame).await.is_err() {
            warn!(addr = %addr, "Kiosk left before status was sent");
            state.clients.fetch_sub(1, Ordering::AcqRel);
            return;
        }
    }

    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(64);

    // Outgoing frame task
    let outgoing_handle = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Broadcast forwarding task
    let outgoing_tx_broadcast = outgoing_tx.clone();
    let broadcast_handle = tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(msg) => {
                    let Some(frame) = to_frame(&msg) else { continue };
                    if outgoing_tx_broadcast.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(addr = %addr, skipped, "Kiosk broadcast receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Ping task
    let outgoing_tx_ping = outgoing_tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_interval = interval(PING_INTERVAL);
        loop {
            ping_interval.tick().await;
            if outgoing_tx_ping
                .send(Message::Ping(axum::body::Bytes::new()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Main receive loop
    loop {
        let text = match receiver.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
            // axum answers pings itself
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                info!(addr = %addr, "Kiosk requested close");
                break;
            }
            Some(Err(e)) => {
                warn!(addr = %addr, error = %e, "Kiosk WebSocket error");
                break;
            }
            None => {
                info!(addr = %addr, "Kiosk disconnected");
                break;
            }
        };

        let reply = state.handle_text(&text).await;
        if let Some(frame) = to_frame(&reply) {
            if outgoing_tx.send(frame).await.is_err() {
                break;
            }
        }
    }

    ping_handle.abort();
    broadcast_handle.abort();
    outgoing_handle.abort();
    let clients = state.clients.fetch_sub(1, Ordering::AcqRel) - 1;
    debug!(addr = %addr, clients, "Kiosk socket closed");
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;
    use rvm_db::DbConfig;
    use serde_json::{json, Value};

    async fn state() -> BridgeState {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let controller = Arc::new(ConnectivityController::new(3));
        let sync = Arc::new(SyncEngine::new(
            db.clone(),
            Arc::new(ScriptedTransport::new()),
            Duration::from_secs(30),
        ));
        BridgeState::new(controller, db, sync)
    }

    fn go_offline(state: &BridgeState) {
        for _ in 0..3 {
            state.controller.on_failure("timeout");
        }
    }

    fn deposit(items: Value) -> KioskRequest {
        serde_json::from_value(json!({"type": "deposit", "items": items})).unwrap()
    }

    fn error_code(reply: KioskMessage) -> DepositErrorCode {
        match reply {
            KioskMessage::DepositError { code, .. } => code,
            other => panic!("expected deposit_error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deposit_refused_unless_offline() {
        let state = state().await;
        let request = deposit(json!([{"type": "PET", "weight": 12.0, "points": 5}]));

        // TRANSITIONING
        let reply = state.handle_request(request.clone()).await;
        assert_eq!(error_code(reply), DepositErrorCode::UseServer);

        state.controller.on_success(&json!({"system_donation_user_id": 7}));
        let reply = state.handle_request(request).await;
        assert_eq!(error_code(reply), DepositErrorCode::UseServer);
        assert_eq!(state.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_offline_deposit_without_user_id() {
        let state = state().await;
        go_offline(&state);

        let reply = state.handle_request(deposit(json!([{"type": "PET"}]))).await;
        assert_eq!(error_code(reply), DepositErrorCode::NoUserId);
    }

    #[tokio::test]
    async fn test_offline_deposit_is_stored() {
        let state = state().await;
        state.controller.on_success(&json!({"system_donation_user_id": 7}));
        go_offline(&state);

        let reply = state
            .handle_request(deposit(json!([{"type": "PET", "weight": 12.0, "points": 5}])))
            .await;

        let KioskMessage::DepositAck { status, session_id, .. } = reply else {
            panic!("expected deposit_ack");
        };
        assert_eq!(status, "stored_locally");
        assert!(rvm_core::is_valid_session_id(&session_id));

        let stored = state.db.transactions().pending().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].user_id, 7);
        assert_eq!(stored[0].items, vec![TransactionItem::new("PET", 12.0, 5)]);
    }

    #[tokio::test]
    async fn test_invalid_items_report_storage_failure() {
        let state = state().await;
        state.controller.on_success(&json!({"system_donation_user_id": 7}));
        go_offline(&state);

        let reply = state
            .handle_request(deposit(json!([{"type": "PET", "weight": -1.0}])))
            .await;
        assert_eq!(error_code(reply), DepositErrorCode::StorageFailed);
        assert_eq!(state.pending_count().await, 0);
    }

    async fn offline_with_user(user_id: i64) -> BridgeState {
        let state = state().await;
        state
            .controller
            .on_success(&json!({"system_donation_user_id": user_id}));
        go_offline(&state);
        state
    }

    #[tokio::test]
    async fn test_deposit_accepts_whole_float_points() {
        let state = offline_with_user(7).await;

        let reply = state
            .handle_text(
                r#"{"type":"deposit","items":[{"bottle_type":"PET","weight":12.0,"points":5.0}]}"#,
            )
            .await;
        assert!(matches!(reply, KioskMessage::DepositAck { .. }), "{:?}", reply);

        let stored = state.db.transactions().pending().await.unwrap();
        assert_eq!(stored[0].items, vec![TransactionItem::new("PET", 12.0, 5)]);
    }

    #[tokio::test]
    async fn test_deposit_null_weight_takes_default() {
        let state = offline_with_user(7).await;

        let reply = state
            .handle_text(r#"{"type":"deposit","items":[{"type":"CAN","weight":null,"points":5}]}"#)
            .await;
        assert!(matches!(reply, KioskMessage::DepositAck { .. }), "{:?}", reply);

        let stored = state.db.transactions().pending().await.unwrap();
        assert_eq!(stored[0].items, vec![TransactionItem::new("CAN", 0.0, 5)]);
    }

    #[tokio::test]
    async fn test_deposit_null_items_is_acknowledged() {
        let state = offline_with_user(7).await;

        let reply = state.handle_text(r#"{"type":"deposit","items":null}"#).await;
        assert!(matches!(reply, KioskMessage::DepositAck { .. }), "{:?}", reply);
        assert_eq!(state.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_unreadable_deposit_gets_deposit_error() {
        let state = offline_with_user(7).await;

        for frame in [
            r#"{"type":"deposit","items":[{"type":"PET","points":5.5}]}"#,
            r#"{"type":"deposit","items":"PET"}"#,
            r#"{"type":"deposit","items":[{"weight":"heavy"}]}"#,
        ] {
            let reply = state.handle_text(frame).await;
            assert_eq!(error_code(reply), DepositErrorCode::StorageFailed, "{}", frame);
        }
        assert_eq!(state.pending_count().await, 0);

        // Refusals still take precedence over unreadable items
        state.controller.on_success(&json!({}));
        let reply = state.handle_text(r#"{"type":"deposit","items":"PET"}"#).await;
        assert_eq!(error_code(reply), DepositErrorCode::UseServer);
    }

    #[tokio::test]
    async fn test_simple_requests() {
        let state = state().await;

        let KioskMessage::Status { data } = state.handle_text(r#"{"type":"get_status"}"#).await else {
            panic!("expected status");
        };
        assert_eq!(data.mode, EdgeMode::Transitioning);
        assert!(!data.online);

        assert_eq!(
            state.handle_text(r#"{"type":"get_pending"}"#).await,
            KioskMessage::PendingInfo { count: 0 }
        );
        assert_eq!(
            state.handle_text(r#"{"type":"ping","timestamp":"2024-06-10T08:00:00Z"}"#).await,
            KioskMessage::Pong {
                timestamp: json!("2024-06-10T08:00:00Z")
            }
        );
        let KioskMessage::Pong { timestamp } = state.handle_text(r#"{"type":"ping"}"#).await else {
            panic!("expected pong");
        };
        assert!(timestamp.is_string());
        assert_eq!(state.handle_text("not json").await, KioskMessage::invalid_json());
        assert_eq!(
            state.handle_text(r#"{"type":"launch_rockets"}"#).await,
            KioskMessage::invalid_json()
        );
    }

    #[tokio::test]
    async fn test_connection_lost_forces_offline() {
        let state = state().await;
        state.controller.on_success(&json!({}));

        let KioskMessage::Status { data } = state.handle_request(KioskRequest::ConnectionLost).await
        else {
            panic!("expected status");
        };
        assert_eq!(data.mode, EdgeMode::OfflineGuest);
        assert!(state.controller.is_offline());
    }

    #[tokio::test]
    async fn test_sync_now_with_nothing_pending() {
        let state = state().await;

        let KioskMessage::SyncResult { data } = state.handle_request(KioskRequest::SyncNow).await
        else {
            panic!("expected sync_result");
        };
        assert_eq!(data.status, "success");
        assert_eq!(data.synced_count, Some(0));
    }
}
