//! # Kiosk Bridge Messages
//!
//! JSON messages exchanged with the local kiosk UI over the bridge
//! WebSocket. Every message carries a `type` tag.
//!
//! ## Message Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Kiosk ⇄ Edge Agent                                 │
//! │                                                                         │
//! │  Kiosk                              Edge Agent                          │
//! │    │  {"type":"deposit","items":[…]}   │                                │
//! │    │ ─────────────────────────────────►│                                │
//! │    │                                   │ OFFLINE_GUEST? store locally   │
//! │    │  {"type":"deposit_ack",…}         │                                │
//! │    │ ◄─────────────────────────────────│                                │
//! │    │   or {"type":"deposit_error",     │                                │
//! │    │       "code":"USE_SERVER"|…}      │                                │
//! │    │                                   │                                │
//! │    │  {"type":"status","data":{…}}     │ pushed on every mode change    │
//! │    │ ◄─────────────────────────────────│                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::connectivity::EdgeMode;
use crate::types::{ActivityLogEntry, TransactionItem};

// =============================================================================
// Requests (kiosk → agent)
// =============================================================================

/// A message sent by the kiosk UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KioskRequest {
    /// Store a deposit session (only honoured while offline).
    Deposit {
        #[serde(default, deserialize_with = "null_as_default")]
        items: Vec<DepositItem>,
    },
    /// Ask for a `status` message.
    GetStatus,
    /// Ask for the number of transactions waiting for upload.
    GetPending,
    /// Ask for the sync engine status.
    GetSyncStatus,
    /// Run the sync engine now.
    SyncNow,
    /// The kiosk lost its own real-time channel to the backend.
    ConnectionLost,
    /// Keep-alive; `timestamp` is echoed back in the `pong`.
    Ping {
        #[serde(default)]
        #[ts(type = "unknown")]
        timestamp: Option<Value>,
    },
}

impl KioskRequest {
    /// Parses a kiosk frame that is already valid JSON.
    ///
    /// ## Returns
    /// * `Ok(request)` - a known request
    /// * `Err(Some(e))` - a `deposit` whose items could not be read
    /// * `Err(None)` - not a request this agent understands
    pub fn from_value(value: Value) -> Result<Self, Option<serde_json::Error>> {
        let is_deposit = value.get("type").and_then(Value::as_str) == Some("deposit");
        serde_json::from_value(value).map_err(|e| is_deposit.then_some(e))
    }
}

/// A deposited item as the kiosk sends it.
///
/// Missing or `null` fields take defaults. `points` may arrive as a whole
/// float (`5.0`) from JavaScript clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DepositItem {
    #[serde(
        default = "default_bottle_type",
        alias = "type",
        deserialize_with = "bottle_type_or_unknown"
    )]
    pub bottle_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub weight: f64,
    #[serde(default, deserialize_with = "whole_points")]
    pub points: i64,
}

fn default_bottle_type() -> String {
    "unknown".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn bottle_type_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_bottle_type))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPoints {
    Whole(i64),
    Float(f64),
}

fn whole_points<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawPoints>::deserialize(deserializer)? {
        None => Ok(0),
        Some(RawPoints::Whole(points)) => Ok(points),
        Some(RawPoints::Float(points))
            if points.fract() == 0.0 && points.abs() < i64::MAX as f64 =>
        {
            Ok(points as i64)
        }
        Some(RawPoints::Float(points)) => Err(D::Error::custom(format!(
            "points must be a whole number, got {}",
            points
        ))),
    }
}

impl From<DepositItem> for TransactionItem {
    fn from(item: DepositItem) -> Self {
        TransactionItem {
            bottle_type: item.bottle_type,
            weight: item.weight,
            points: item.points,
        }
    }
}

// =============================================================================
// Replies (agent → kiosk)
// =============================================================================

/// Why a deposit was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositErrorCode {
    /// Offline, but the donation user is not known yet.
    NoUserId,
    /// The offline store rejected the write.
    StorageFailed,
    /// The device is not offline; the kiosk must talk to the server.
    UseServer,
}

impl DepositErrorCode {
    /// Human-readable message shown by the kiosk.
    pub fn message(&self) -> &'static str {
        match self {
            DepositErrorCode::NoUserId => "System not initialized. Please wait for connection.",
            DepositErrorCode::StorageFailed => "Failed to store transaction",
            DepositErrorCode::UseServer => "Online mode active. Please use the server connection.",
        }
    }
}

/// Connectivity summary pushed to the kiosk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct KioskStatus {
    pub online: bool,
    pub mode: EdgeMode,
    pub pending_sync_count: i64,
    pub message: String,
}

impl KioskStatus {
    /// Builds the summary with the banner text for `mode`.
    pub fn new(mode: EdgeMode, pending_sync_count: i64) -> Self {
        let message = match mode {
            EdgeMode::Online => "Connected to server",
            EdgeMode::OfflineGuest => "Offline mode - donations are stored locally",
            EdgeMode::Transitioning => "Connecting to server...",
        };

        KioskStatus {
            online: mode == EdgeMode::Online,
            mode,
            pending_sync_count,
            message: message.to_string(),
        }
    }
}

/// Sync engine summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatusInfo {
    pub is_syncing: bool,
    pub pending_count: i64,
    pub recent_logs: Vec<ActivityLogEntry>,
}

/// Outcome of a manual sync, as reported to the kiosk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncResultInfo {
    /// `success`, `skipped` or `error`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A message sent to the kiosk UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KioskMessage {
    Status {
        data: KioskStatus,
    },
    DepositAck {
        status: String,
        session_id: String,
        message: String,
    },
    DepositError {
        error: String,
        code: DepositErrorCode,
    },
    PendingInfo {
        count: i64,
    },
    SyncStatus {
        data: SyncStatusInfo,
    },
    SyncResult {
        data: SyncResultInfo,
    },
    Pong {
        #[ts(type = "unknown")]
        timestamp: Value,
    },
    Error {
        error: String,
    },
}

impl KioskMessage {
    /// Acknowledges a locally stored deposit.
    pub fn deposit_ack(session_id: impl Into<String>) -> Self {
        KioskMessage::DepositAck {
            status: "stored_locally".to_string(),
            session_id: session_id.into(),
            message: "Donation saved. It will be synced when the connection returns.".to_string(),
        }
    }

    /// Rejects a deposit with `code`.
    pub fn deposit_error(code: DepositErrorCode) -> Self {
        KioskMessage::DepositError {
            error: code.message().to_string(),
            code,
        }
    }

    /// Reply to a frame that was not valid JSON or not a known request.
    pub fn invalid_json() -> Self {
        KioskMessage::Error {
            error: "Invalid JSON format".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deposit_request_defaults() {
        let request: KioskRequest =
            serde_json::from_value(json!({"type": "deposit", "items": [{}, {"type": "PET", "points": 5}]}))
                .unwrap();

        let KioskRequest::Deposit { items } = request else {
            panic!("expected deposit");
        };
        assert_eq!(items[0].bottle_type, "unknown");
        assert_eq!(items[0].weight, 0.0);
        assert_eq!(items[0].points, 0);
        assert_eq!(items[1].bottle_type, "PET");
        assert_eq!(items[1].points, 5);
    }

    #[test]
    fn test_unit_requests_parse() {
        let request: KioskRequest = serde_json::from_str(r#"{"type":"get_pending"}"#).unwrap();
        assert_eq!(request, KioskRequest::GetPending);

        let request: KioskRequest = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(request, KioskRequest::Ping { timestamp: None });

        let request: KioskRequest =
            serde_json::from_str(r#"{"type":"ping","timestamp":1718000000000}"#).unwrap();
        assert_eq!(
            request,
            KioskRequest::Ping {
                timestamp: Some(json!(1718000000000_i64))
            }
        );
    }

    fn first_item(frame: Value) -> DepositItem {
        let KioskRequest::Deposit { mut items } = KioskRequest::from_value(frame).unwrap() else {
            panic!("expected deposit");
        };
        items.remove(0)
    }

    #[test]
    fn test_deposit_points_as_whole_float() {
        let item = first_item(json!({
            "type": "deposit",
            "items": [{"bottle_type": "PET", "weight": 12.0, "points": 5.0}]
        }));
        assert_eq!(item.bottle_type, "PET");
        assert_eq!(item.weight, 12.0);
        assert_eq!(item.points, 5);
    }

    #[test]
    fn test_deposit_null_fields_take_defaults() {
        let item = first_item(json!({
            "type": "deposit",
            "items": [{"type": null, "weight": null, "points": 5}]
        }));
        assert_eq!(item.bottle_type, "unknown");
        assert_eq!(item.weight, 0.0);
        assert_eq!(item.points, 5);

        let item = first_item(json!({"type": "deposit", "items": [{"points": null}]}));
        assert_eq!(item.points, 0);
    }

    #[test]
    fn test_deposit_null_items_is_empty() {
        let request = KioskRequest::from_value(json!({"type": "deposit", "items": null})).unwrap();
        assert_eq!(request, KioskRequest::Deposit { items: vec![] });
    }

    #[test]
    fn test_malformed_deposit_is_reported_as_deposit() {
        for frame in [
            json!({"type": "deposit", "items": [{"points": 5.5}]}),
            json!({"type": "deposit", "items": "PET"}),
            json!({"type": "deposit", "items": [42]}),
        ] {
            assert!(matches!(KioskRequest::from_value(frame), Err(Some(_))));
        }

        assert!(matches!(
            KioskRequest::from_value(json!({"type": "launch_rockets"})),
            Err(None)
        ));
        assert!(matches!(KioskRequest::from_value(json!([1, 2])), Err(None)));
    }

    #[test]
    fn test_deposit_error_code_wire_names() {
        let value = serde_json::to_value(KioskMessage::deposit_error(DepositErrorCode::NoUserId))
            .unwrap();
        assert_eq!(value["type"], "deposit_error");
        assert_eq!(value["code"], "NO_USER_ID");

        let value = serde_json::to_value(DepositErrorCode::UseServer).unwrap();
        assert_eq!(value, "USE_SERVER");
    }

    #[test]
    fn test_status_message_shape() {
        let value = serde_json::to_value(KioskMessage::Status {
            data: KioskStatus::new(EdgeMode::OfflineGuest, 2),
        })
        .unwrap();

        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["online"], false);
        assert_eq!(value["data"]["mode"], "offline_guest");
        assert_eq!(value["data"]["pending_sync_count"], 2);
    }

    #[test]
    fn test_pong_echoes_any_timestamp() {
        let value = serde_json::to_value(KioskMessage::Pong {
            timestamp: json!(1718000000000_i64),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "pong", "timestamp": 1718000000000_i64}));
    }

    #[test]
    fn test_deposit_ack_shape() {
        let value = serde_json::to_value(KioskMessage::deposit_ack("offline-x")).unwrap();
        assert_eq!(value["status"], "stored_locally");
        assert_eq!(value["session_id"], "offline-x");
    }
}
