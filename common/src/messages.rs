// common/src/messages.rs
use actix::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{BridgeError, ErrorCode};

/// Frame on the relay <-> worker socket.
///
/// Both sides originate requests: the relay forwards page traffic, and the
/// worker issues page-storage reads/writes while mirroring during
/// `SYNC_STORAGE`.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum WireFrame {
    Request(BridgeRequest),
    Response(BridgeResponse),
}

/// Request envelope. The `request_id` is caller-generated and must appear
/// unchanged in the matching response.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct BridgeRequest {
    pub request_id: Uuid,
    #[serde(flatten)]
    pub payload: RequestPayload,
}

impl BridgeRequest {
    pub fn new(payload: RequestPayload) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            payload,
        }
    }
}

/// A single critical `localStorage` entry moved by a sweep batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalFile {
    pub key: String,
    pub value: String,
}

/// Snapshot of one object store taken during a record-store backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub store: String,
    /// True when records were reduced to a metadata-only projection.
    pub metadata_only: bool,
    pub records: Vec<Value>,
}

/// Closed message-type enumeration, validated at the boundary before any
/// dispatch runs. Wire tags keep the original SCREAMING_SNAKE_CASE names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestPayload {
    StoreKeys {
        #[serde(default)]
        identifier: Option<String>,
        keys: Value,
    },
    GetKeys {
        identifier: String,
    },
    ListAccounts,
    GetBankAccounts {
        identifier: String,
    },
    GetPasswords {
        identifier: String,
    },
    GetContacts {
        identifier: String,
    },
    CheckSyncStatus,
    SyncAllData {
        identifier: String,
        #[serde(default)]
        bank_accounts: Vec<Value>,
        #[serde(default)]
        passwords: Vec<Value>,
        #[serde(default)]
        contacts: Vec<Value>,
    },
    SyncStorage,
    TestConnection,
    TestStorage,
    Heartbeat,
    SyncCriticalFiles {
        files: Vec<CriticalFile>,
    },
    BackupIndexeddb {
        identifier: String,
        database: String,
        snapshot: Vec<StoreSnapshot>,
    },
    CheckExtension,
    GetLocalStorageValue {
        key: String,
    },
    SetLocalStorageValue {
        key: String,
        value: String,
    },
    ListLocalStorageKeys,
    StorageChanged {
        key: String,
        #[serde(default)]
        value: Option<String>,
    },
    PageNavigated {
        path: String,
    },
    PutRecord {
        database: String,
        store: String,
        record: Value,
    },
}

impl RequestPayload {
    /// Wire tag of this payload, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestPayload::StoreKeys { .. } => "STORE_KEYS",
            RequestPayload::GetKeys { .. } => "GET_KEYS",
            RequestPayload::ListAccounts => "LIST_ACCOUNTS",
            RequestPayload::GetBankAccounts { .. } => "GET_BANK_ACCOUNTS",
            RequestPayload::GetPasswords { .. } => "GET_PASSWORDS",
            RequestPayload::GetContacts { .. } => "GET_CONTACTS",
            RequestPayload::CheckSyncStatus => "CHECK_SYNC_STATUS",
            RequestPayload::SyncAllData { .. } => "SYNC_ALL_DATA",
            RequestPayload::SyncStorage => "SYNC_STORAGE",
            RequestPayload::TestConnection => "TEST_CONNECTION",
            RequestPayload::TestStorage => "TEST_STORAGE",
            RequestPayload::Heartbeat => "HEARTBEAT",
            RequestPayload::SyncCriticalFiles { .. } => "SYNC_CRITICAL_FILES",
            RequestPayload::BackupIndexeddb { .. } => "BACKUP_INDEXEDDB",
            RequestPayload::CheckExtension => "CHECK_EXTENSION",
            RequestPayload::GetLocalStorageValue { .. } => "GET_LOCAL_STORAGE_VALUE",
            RequestPayload::SetLocalStorageValue { .. } => "SET_LOCAL_STORAGE_VALUE",
            RequestPayload::ListLocalStorageKeys => "LIST_LOCAL_STORAGE_KEYS",
            RequestPayload::StorageChanged { .. } => "STORAGE_CHANGED",
            RequestPayload::PageNavigated { .. } => "PAGE_NAVIGATED",
            RequestPayload::PutRecord { .. } => "PUT_RECORD",
        }
    }
}

/// Response envelope. Every handler answers exactly once on every path,
/// including caught exceptions; the transport has no independent timeout
/// signal back to the original caller.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct BridgeResponse {
    pub request_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_source: Option<String>,
}

impl BridgeResponse {
    pub fn ok(request_id: Uuid, data: Value) -> Self {
        Self {
            request_id,
            success: true,
            data,
            error: None,
            error_code: None,
            error_source: None,
        }
    }

    pub fn failure(request_id: Uuid, code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            error_code: Some(code),
            error_source: None,
        }
    }

    pub fn from_error(request_id: Uuid, err: &BridgeError) -> Self {
        Self::failure(request_id, err.code(), err.to_string())
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.error_source = Some(source.into());
        self
    }
}

/// Unsolicited frames from the relay to its page, outside the
/// request/response correlation.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageEvent {
    /// Presence announcement; idempotent from the page's point of view.
    /// Emitted on session start and again after each reconnection.
    ExtensionReady { version: String, reconnected: bool },
    /// Worker-link state change. The page mirrors this into its own
    /// storage as a cross-reload breadcrumb.
    ConnectionChanged {
        connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A key restored from extension storage during a two-way sync; the
    /// page applies it to its own local storage.
    StorageMirrored { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_tags_match_original_names() {
        let req = BridgeRequest::new(RequestPayload::GetKeys {
            identifier: "user@example.com".into(),
        });
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "GET_KEYS");
        assert_eq!(json["identifier"], "user@example.com");
        assert!(json["request_id"].is_string());

        let req = BridgeRequest::new(RequestPayload::BackupIndexeddb {
            identifier: "u".into(),
            database: "mata_vault".into(),
            snapshot: vec![],
        });
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "BACKUP_INDEXEDDB");
    }

    #[test]
    fn unknown_type_rejected_at_boundary() {
        let raw = r#"{"request_id":"7f9c0a93-6a0f-4e0e-9c55-222222222222","type":"DROP_TABLES"}"#;
        assert!(serde_json::from_str::<BridgeRequest>(raw).is_err());
    }

    #[test]
    fn response_round_trips_request_id() {
        let id = Uuid::new_v4();
        let resp = BridgeResponse::ok(id, serde_json::json!({"keys": 3}));
        let json = serde_json::to_string(&resp).unwrap();
        let back: BridgeResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, id);
        assert!(back.success);
        assert_eq!(back.data["keys"], 3);
        assert!(!json.contains("error"), "null fields must be omitted: {json}");
    }

    #[test]
    fn failure_carries_classified_code() {
        let id = Uuid::new_v4();
        let resp = BridgeResponse::failure(id, ErrorCode::NotFound, "No keys found")
            .with_source("worker");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], "NOT_FOUND");
        assert_eq!(json["error_source"], "worker");
    }

    #[test]
    fn wire_frame_distinguishes_directions() {
        let frame = WireFrame::Request(BridgeRequest::new(RequestPayload::Heartbeat));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["frame"], "request");
        assert_eq!(json["type"], "HEARTBEAT");
    }
}
