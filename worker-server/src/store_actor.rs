// worker-server/src/store_actor.rs
use actix::{Actor, Context, Handler, Message, MessageResult};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use common::keys::{
    backup_key, candidate_identifier_forms, is_critical_key, key_bundle_key, parse_storage_value,
    storage_value_to_string, ACCOUNT_LIST_KEY, KEYS_PREFIX, LAST_SYNC_KEY,
};
use common::models::{AccountSummary, KeyBundleRecord, SyncStatus};
use common::{BridgeError, BridgeRequest, BridgeResponse, RequestPayload, BRIDGE_VERSION};

use crate::storage::ExtensionStore;

const ERROR_SOURCE: &str = "worker";
const DIAGNOSTIC_KEY: &str = "mata_storage_diagnostic";

/// Dispatch a wire request against the store. The single mailbox
/// serializes every read-modify-write, so concurrent `STORE_KEYS` for
/// different identifiers cannot drop each other's updates.
#[derive(Message)]
#[rtype(result = "BridgeResponse")]
pub struct Dispatch(pub BridgeRequest);

#[derive(Message)]
#[rtype(result = "Option<Value>")]
pub struct GetValue {
    pub key: String,
}

#[derive(Message)]
#[rtype(result = "Result<(), BridgeError>")]
pub struct SetValue {
    pub key: String,
    pub value: Value,
}

#[derive(Message)]
#[rtype(result = "Vec<String>")]
pub struct ListKeys;

#[derive(Message)]
#[rtype(result = "Vec<AccountSummary>")]
pub struct GetAccounts;

#[derive(Debug, Clone, Copy)]
pub enum DataCategory {
    BankAccounts,
    Passwords,
    Contacts,
}

impl DataCategory {
    pub fn storage_key(&self, identifier: &str) -> String {
        let prefix = match self {
            DataCategory::BankAccounts => "mata_bank_accounts_",
            DataCategory::Passwords => "mata_passwords_",
            DataCategory::Contacts => "mata_contacts_",
        };
        format!("{}{}", prefix, common::keys::sanitize_identifier(identifier))
    }
}

#[derive(Message)]
#[rtype(result = "Vec<Value>")]
pub struct GetCategory {
    pub identifier: String,
    pub category: DataCategory,
}

/// Sync-status view for the popup: the raw record plus whether a resync
/// is currently due.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncStatusView {
    pub status: Option<SyncStatus>,
    pub sync_due: bool,
}

#[derive(Message)]
#[rtype(result = "SyncStatusView")]
pub struct GetSyncStatus;

#[derive(Message)]
#[rtype(result = "()")]
pub struct RecordSyncOutcome(pub SyncStatus);

/// Sole owner of the worker's persistent storage.
pub struct VaultStoreActor {
    store: ExtensionStore,
    instance_id: Uuid,
    sweep_interval_secs: u64,
}

impl VaultStoreActor {
    pub fn new(store: ExtensionStore, sweep_interval_secs: u64) -> Self {
        Self {
            store,
            instance_id: Uuid::new_v4(),
            sweep_interval_secs,
        }
    }

    fn account_list(&self) -> Vec<KeyBundleRecord> {
        self.store
            .get(ACCOUNT_LIST_KEY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn store_keys(&mut self, identifier: Option<&str>, keys: &Value) -> Result<Value, BridgeError> {
        let identifier = identifier.ok_or_else(|| {
            BridgeError::Processing("STORE_KEYS requires a top-level identifier".into())
        })?;

        let mut accounts = self.account_list();
        let created = match accounts.iter_mut().find(|a| a.identifier == identifier) {
            Some(existing) => {
                existing.apply_update(keys);
                false
            }
            None => {
                accounts.push(KeyBundleRecord::from_payload(identifier, keys));
                true
            }
        };

        let record = accounts
            .iter()
            .find(|a| a.identifier == identifier)
            .cloned()
            .expect("upserted account present");

        self.store
            .set(ACCOUNT_LIST_KEY, serde_json::to_value(&accounts).unwrap_or_default())
            .map_err(|e| BridgeError::Runtime(e.to_string()))?;
        self.store
            .set(
                key_bundle_key(identifier),
                serde_json::to_value(&record).unwrap_or_default(),
            )
            .map_err(|e| BridgeError::Runtime(e.to_string()))?;

        tracing::info!("Stored key bundle for account (created: {})", created);
        Ok(json!({ "identifier": identifier, "created": created }))
    }

    fn get_keys(&self, identifier: &str) -> Result<Value, BridgeError> {
        for form in candidate_identifier_forms(identifier) {
            let key = format!("{}{}", KEYS_PREFIX, form);
            if let Some(value) = self.store.get(&key) {
                // Quick-access records are full bundles; mirrored page values
                // may be the bare serialized keys.
                let (keys, updated_at) = match value.get("keys") {
                    Some(inner) => (inner.clone(), value.get("updated_at").cloned()),
                    None => (value.clone(), None),
                };
                return Ok(json!({
                    "identifier": identifier,
                    "keys": keys,
                    "updated_at": updated_at,
                    "source": "extension",
                }));
            }
        }
        Err(BridgeError::NotFound(format!(
            "No keys found for {}",
            identifier
        )))
    }

    fn list_accounts(&self) -> Value {
        let summaries: Vec<AccountSummary> =
            self.account_list().iter().map(AccountSummary::from).collect();
        json!({ "accounts": summaries })
    }

    fn get_category(&self, identifier: &str, category: DataCategory) -> Vec<Value> {
        self.store
            .get(&category.storage_key(identifier))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn sync_all_data(
        &mut self,
        identifier: &str,
        bank_accounts: Vec<Value>,
        passwords: Vec<Value>,
        contacts: Vec<Value>,
    ) -> Result<Value, BridgeError> {
        let total = bank_accounts.len() + passwords.len() + contacts.len();
        let sets = [
            (DataCategory::BankAccounts, bank_accounts),
            (DataCategory::Passwords, passwords),
            (DataCategory::Contacts, contacts),
        ];
        for (category, items) in sets {
            self.store
                .set(category.storage_key(identifier), Value::Array(items))
                .map_err(|e| BridgeError::Runtime(e.to_string()))?;
        }
        self.record_sync(SyncStatus::record(true, total));
        Ok(json!({ "identifier": identifier, "synced_count": total }))
    }

    fn check_sync_status(&self) -> Value {
        let view = self.sync_status_view();
        json!({ "status": view.status, "sync_due": view.sync_due })
    }

    fn sync_status_view(&self) -> SyncStatusView {
        let status: Option<SyncStatus> = self
            .store
            .get(LAST_SYNC_KEY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());
        let sync_due = status
            .as_ref()
            .map(|s| s.is_due(self.sweep_interval_secs))
            .unwrap_or(true);
        SyncStatusView { status, sync_due }
    }

    fn record_sync(&mut self, status: SyncStatus) {
        if let Err(e) = self
            .store
            .set(LAST_SYNC_KEY, serde_json::to_value(status).unwrap_or_default())
        {
            tracing::warn!("Failed to persist sync status: {}", e);
        }
    }

    /// Merge a sweep batch into storage. A single entry's failure is
    /// recorded and does not abort the remaining entries.
    fn sync_critical_files(
        &mut self,
        files: &[common::CriticalFile],
    ) -> Result<Value, BridgeError> {
        let mut stored = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for file in files {
            if !is_critical_key(&file.key) {
                errors.push(format!("{}: not a critical key", file.key));
                continue;
            }
            match self.store.set(file.key.clone(), parse_storage_value(&file.value)) {
                Ok(()) => stored += 1,
                Err(e) => errors.push(format!("{}: {}", file.key, e)),
            }
        }

        self.record_sync(SyncStatus::record(errors.is_empty() || stored > 0, stored));

        if stored == 0 && !errors.is_empty() {
            return Err(BridgeError::Runtime(format!(
                "all {} entries failed: {}",
                files.len(),
                errors.join("; ")
            )));
        }
        Ok(json!({ "stored": stored, "errors": errors }))
    }

    fn backup_records(
        &mut self,
        identifier: &str,
        database: &str,
        snapshot: &[common::StoreSnapshot],
    ) -> Result<Value, BridgeError> {
        let record_count: usize = snapshot.iter().map(|s| s.records.len()).sum();
        self.store
            .set(
                backup_key(identifier),
                json!({
                    "database": database,
                    "snapshot": snapshot,
                    "saved_at": Utc::now(),
                }),
            )
            .map_err(|e| BridgeError::Runtime(e.to_string()))?;
        tracing::info!(
            "Stored record backup: database={} stores={} records={}",
            database,
            snapshot.len(),
            record_count
        );
        Ok(json!({ "stores": snapshot.len(), "records": record_count }))
    }

    /// Diagnostic write/read/enumerate cycle. The response envelope is the
    /// channel acknowledgment and always goes out; `success` reflects the
    /// operation outcome (any step passed), with per-step detail attached.
    fn test_storage(&mut self) -> BridgeResponse {
        let marker = json!({ "written_at": Utc::now() });

        let write_result = self
            .store
            .set(DIAGNOSTIC_KEY, marker.clone())
            .map_err(|e| e.to_string());

        let read_result = self
            .store
            .reload()
            .map_err(|e| e.to_string())
            .and_then(|_| match self.store.get(DIAGNOSTIC_KEY) {
                Some(v) if v.get("written_at") == marker.get("written_at") => Ok(()),
                Some(_) => Err("diagnostic value mismatch".to_string()),
                None => Err("diagnostic value missing after write".to_string()),
            });

        let enumerate_result = self.store.reload().map_err(|e| e.to_string());

        if let Err(e) = self.store.remove(DIAGNOSTIC_KEY) {
            tracing::debug!("Diagnostic cleanup failed: {}", e);
        }

        let accessible = write_result.is_ok() || read_result.is_ok() || enumerate_result.is_ok();
        let diagnostics = json!({
            "write": step_report(&write_result.map(|_| json!(true))),
            "read": step_report(&read_result.map(|_| json!(true))),
            "enumerate": step_report(&enumerate_result.map(|n| json!(n))),
        });
        let data = json!({ "storage_accessible": accessible, "diagnostics": diagnostics });

        // request_id is filled in by the dispatcher.
        if accessible {
            BridgeResponse::ok(Uuid::nil(), data)
        } else {
            let mut resp = BridgeResponse::failure(
                Uuid::nil(),
                common::ErrorCode::RuntimeError,
                "storage inaccessible",
            )
            .with_source(ERROR_SOURCE);
            resp.data = data;
            resp
        }
    }
}

fn step_report(result: &Result<Value, String>) -> Value {
    match result {
        Ok(detail) => json!({ "ok": true, "detail": detail }),
        Err(e) => json!({ "ok": false, "error": e }),
    }
}

impl Actor for VaultStoreActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            "Vault store ready: {} entries, instance {}",
            self.store.len(),
            self.instance_id
        );
    }
}

impl Handler<Dispatch> for VaultStoreActor {
    type Result = MessageResult<Dispatch>;

    fn handle(&mut self, msg: Dispatch, _ctx: &mut Self::Context) -> Self::Result {
        let Dispatch(request) = msg;
        let request_id = request.request_id;
        tracing::debug!("Dispatching {}", request.payload.kind());

        let result: Result<Value, BridgeError> = match &request.payload {
            RequestPayload::StoreKeys { identifier, keys } => {
                self.store_keys(identifier.as_deref(), keys)
            }
            RequestPayload::GetKeys { identifier } => self.get_keys(identifier),
            RequestPayload::ListAccounts => Ok(self.list_accounts()),
            RequestPayload::GetBankAccounts { identifier } => Ok(json!({
                "items": self.get_category(identifier, DataCategory::BankAccounts)
            })),
            RequestPayload::GetPasswords { identifier } => Ok(json!({
                "items": self.get_category(identifier, DataCategory::Passwords)
            })),
            RequestPayload::GetContacts { identifier } => Ok(json!({
                "items": self.get_category(identifier, DataCategory::Contacts)
            })),
            RequestPayload::CheckSyncStatus => Ok(self.check_sync_status()),
            RequestPayload::SyncAllData {
                identifier,
                bank_accounts,
                passwords,
                contacts,
            } => self.sync_all_data(
                identifier,
                bank_accounts.clone(),
                passwords.clone(),
                contacts.clone(),
            ),
            RequestPayload::SyncCriticalFiles { files } => self.sync_critical_files(files),
            RequestPayload::BackupIndexeddb {
                identifier,
                database,
                snapshot,
            } => self.backup_records(identifier, database, snapshot),
            RequestPayload::TestStorage => {
                let mut resp = self.test_storage();
                resp.request_id = request_id;
                return MessageResult(resp);
            }
            RequestPayload::Heartbeat => Ok(json!({
                "alive": true,
                "timestamp": common::epoch_secs(),
            })),
            RequestPayload::TestConnection => Ok(json!({
                "connected": true,
                "version": BRIDGE_VERSION,
                "timestamp": common::epoch_secs(),
            })),
            RequestPayload::CheckExtension => Ok(json!({
                "version": BRIDGE_VERSION,
                "instance_id": self.instance_id,
            })),
            RequestPayload::GetLocalStorageValue { key } => match self.store.get(key) {
                Some(value) => Ok(json!({
                    "key": key,
                    "value": storage_value_to_string(value),
                    "found": true,
                    "source": "extension",
                })),
                None => Err(BridgeError::NotFound(format!("{} not in storage", key))),
            },
            RequestPayload::SyncStorage => Err(BridgeError::Processing(
                "SYNC_STORAGE runs through a relay session".into(),
            )),
            other => Err(BridgeError::Processing(format!(
                "{} is not a worker message",
                other.kind()
            ))),
        };

        MessageResult(match result {
            Ok(data) => BridgeResponse::ok(request_id, data),
            Err(e) => BridgeResponse::from_error(request_id, &e).with_source(ERROR_SOURCE),
        })
    }
}

impl Handler<GetValue> for VaultStoreActor {
    type Result = MessageResult<GetValue>;

    fn handle(&mut self, msg: GetValue, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.store.get(&msg.key).cloned())
    }
}

impl Handler<SetValue> for VaultStoreActor {
    type Result = MessageResult<SetValue>;

    fn handle(&mut self, msg: SetValue, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(
            self.store
                .set(msg.key, msg.value)
                .map_err(|e| BridgeError::Runtime(e.to_string())),
        )
    }
}

impl Handler<ListKeys> for VaultStoreActor {
    type Result = MessageResult<ListKeys>;

    fn handle(&mut self, _msg: ListKeys, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.store.keys())
    }
}

impl Handler<GetAccounts> for VaultStoreActor {
    type Result = MessageResult<GetAccounts>;

    fn handle(&mut self, _msg: GetAccounts, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.account_list().iter().map(AccountSummary::from).collect())
    }
}

impl Handler<GetCategory> for VaultStoreActor {
    type Result = MessageResult<GetCategory>;

    fn handle(&mut self, msg: GetCategory, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.get_category(&msg.identifier, msg.category))
    }
}

impl Handler<GetSyncStatus> for VaultStoreActor {
    type Result = MessageResult<GetSyncStatus>;

    fn handle(&mut self, _msg: GetSyncStatus, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.sync_status_view())
    }
}

impl Handler<RecordSyncOutcome> for VaultStoreActor {
    type Result = ();

    fn handle(&mut self, msg: RecordSyncOutcome, _ctx: &mut Self::Context) {
        self.record_sync(msg.0);
    }
}
