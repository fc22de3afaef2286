//! End-to-end store-and-forward scenarios: lose the backend, take deposits
//! offline, reconnect, drain.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{eventually, temp_db, test_config, MockBackend, StaticProbe};
use rvm_core::kiosk::{KioskMessage, KioskRequest};
use rvm_core::{is_valid_session_id, EdgeMode, TransactionItem};
use rvm_db::Database;
use rvm_edge::driver::{HANDSHAKE_PATH, HEARTBEAT_PATH};
use rvm_edge::sync::SYNC_PATH;
use rvm_edge::{BridgeState, EdgeAgent, LoggingCommandHandler, SyncOutcome};

fn agent(db: &Database, backend: &Arc<MockBackend>) -> EdgeAgent {
    EdgeAgent::new(
        &test_config(),
        db.clone(),
        backend.clone(),
        Arc::new(StaticProbe),
        Arc::new(LoggingCommandHandler::new()),
    )
    .unwrap()
}

fn handshake_body() -> serde_json::Value {
    json!({
        "status": "success",
        "data": {
            "identity": {"rvm_name": "RVM Test"},
            "policy": {"system_donation_user_id": 7}
        }
    })
}

/// Waits for the reconnect-triggered sync to empty the store.
async fn drained(db: &Database) -> bool {
    eventually(move || async move { db.transactions().pending_count().await.unwrap() == 0 }).await
}

async fn deposit(state: &BridgeState, items: serde_json::Value) -> KioskMessage {
    let request: KioskRequest =
        serde_json::from_value(json!({"type": "deposit", "items": items})).unwrap();
    state.handle_request(request).await
}

#[tokio::test]
async fn offline_deposits_are_drained_after_reconnect() {
    let (db, _dir) = temp_db().await;
    let backend = MockBackend::new();
    let agent = agent(&db, &backend);
    let controller = agent.controller();
    let bridge = BridgeState::new(controller.clone(), db.clone(), agent.sync_engine());

    // Boot: handshake teaches us the donation user
    backend.ok(HANDSHAKE_PATH, handshake_body());
    let (_tx, mut shutdown) = tokio::sync::mpsc::channel(1);
    let info = agent.handshake(&mut shutdown).await.unwrap();
    assert_eq!(info.rvm_name.as_deref(), Some("RVM Test"));
    assert_eq!(controller.mode(), EdgeMode::Online);

    // Three failed heartbeats take the device offline
    for _ in 0..3 {
        assert!(agent.tick().await.is_empty());
    }
    assert_eq!(controller.mode(), EdgeMode::OfflineGuest);

    let reply = deposit(&bridge, json!([{"type": "PET", "weight": 12.0, "points": 5}])).await;
    let KioskMessage::DepositAck { session_id, .. } = reply else {
        panic!("expected deposit_ack, got {:?}", reply);
    };
    assert!(is_valid_session_id(&session_id));
    assert_eq!(db.transactions().pending_count().await.unwrap(), 1);

    // The next good heartbeat reconnects and the sync runs on its own
    backend.ok(SYNC_PATH, json!({"status": "success", "synced_count": 1}));
    backend.ok(
        HEARTBEAT_PATH,
        json!({"status": "success", "system_donation_user_id": 7}),
    );
    agent.tick().await;
    assert_eq!(controller.mode(), EdgeMode::Online);

    assert!(drained(&db).await);

    let uploads = backend.requests_to(SYNC_PATH);
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0]["transactions"][0]["session_id"], session_id.as_str());
    assert_eq!(uploads[0]["transactions"][0]["user_id"], 7);
    assert_eq!(
        uploads[0]["transactions"][0]["items"],
        json!([{"type": "PET", "weight": 12.0, "points": 5}])
    );

    let synced = db.transactions().get_by_session(&session_id).await.unwrap().unwrap();
    assert!(synced.synced_at.is_some());
}

#[tokio::test]
async fn failed_upload_is_resent_on_next_reconnect() {
    let (db, _dir) = temp_db().await;
    let backend = MockBackend::new();
    let agent = agent(&db, &backend);
    let controller = agent.controller();

    controller.on_success(&json!({"system_donation_user_id": 7}));
    controller.on_transport_lost();

    let items = vec![
        TransactionItem::new("PET", 12.0, 5),
        TransactionItem::new("ALU", 14.5, 8),
    ];
    let session_id = db.transactions().create(&items, Some(7)).await.unwrap();

    // First reconnect: the backend errors, nothing is marked
    backend.queue(
        SYNC_PATH,
        Ok(rvm_edge::HttpResponse::new(502, json!("bad gateway"))),
    );
    controller.on_success(&json!({}));
    let backend_ref = &backend;
    let engine = agent.sync_engine();
    let engine_ref = &engine;
    assert!(eventually(move || async move { backend_ref.requests_to(SYNC_PATH).len() == 1 }).await);
    assert!(eventually(move || async move { !engine_ref.is_syncing() }).await);
    assert_eq!(db.transactions().pending_count().await.unwrap(), 1);

    let logs = db.activity().recent(1).await.unwrap();
    assert_eq!(logs[0].event_type, "sync_failed");

    // Second reconnect: same session goes up again and is confirmed
    backend.ok(SYNC_PATH, json!({"synced_count": 1}));
    controller.on_transport_lost();
    controller.on_success(&json!({}));

    assert!(drained(&db).await);

    let uploads = backend.requests_to(SYNC_PATH);
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0], uploads[1]);
    assert_eq!(uploads[1]["transactions"][0]["session_id"], session_id.as_str());
    assert_eq!(uploads[1]["transactions"][0]["items"][1]["type"], "ALU");
}

#[tokio::test]
async fn first_connection_does_not_sync() {
    let (db, _dir) = temp_db().await;
    let backend = MockBackend::new();
    let agent = agent(&db, &backend);

    backend.ok(HEARTBEAT_PATH, json!({"status": "success"}));
    backend.ok(HEARTBEAT_PATH, json!({"status": "success"}));
    agent.tick().await;
    agent.tick().await;

    assert_eq!(agent.controller().mode(), EdgeMode::Online);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(backend.requests_to(SYNC_PATH).is_empty());
}

#[tokio::test]
async fn manual_sync_with_empty_store() {
    let (db, _dir) = temp_db().await;
    let backend = MockBackend::new();
    let agent = agent(&db, &backend);

    let outcome = agent.sync_engine().sync().await.unwrap();

    assert_eq!(outcome, SyncOutcome::Synced { synced_count: 0, marked: 0 });
    assert!(backend.requests_to(SYNC_PATH).is_empty());
    assert!(db.activity().recent(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn offline_before_first_contact_still_needs_user_id() {
    let (db, _dir) = temp_db().await;
    let backend = MockBackend::new();
    let agent = agent(&db, &backend);
    let bridge = BridgeState::new(agent.controller(), db.clone(), agent.sync_engine());

    for _ in 0..3 {
        agent.tick().await;
    }
    assert_eq!(agent.controller().mode(), EdgeMode::OfflineGuest);

    let reply = deposit(&bridge, json!([{"type": "PET"}])).await;
    assert!(matches!(
        reply,
        KioskMessage::DepositError { code: rvm_core::kiosk::DepositErrorCode::NoUserId, .. }
    ));
    assert_eq!(db.transactions().pending_count().await.unwrap(), 0);
}
