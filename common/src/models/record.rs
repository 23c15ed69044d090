// common/src/models/record.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored key bundle for one user. The `keys` payload is the opaque
/// serialized output of the external vault/crypto module; the bridge never
/// interprets its contents beyond lifting the public display fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundleRecord {
    pub identifier: String,
    pub display_name: Option<String>,
    pub public_key: Option<String>,
    pub keys: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KeyBundleRecord {
    /// Build a new record from a `STORE_KEYS` payload, lifting the public
    /// display fields out of the opaque bundle when present.
    pub fn from_payload(identifier: &str, keys: &Value) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.to_string(),
            display_name: extract_string(keys, &["displayName", "display_name", "name"]),
            public_key: extract_string(keys, &["publicKey", "public_key"]),
            keys: keys.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an updated payload to an existing record, refreshing the
    /// update timestamp and preserving creation time.
    pub fn apply_update(&mut self, keys: &Value) {
        if let Some(name) = extract_string(keys, &["displayName", "display_name", "name"]) {
            self.display_name = Some(name);
        }
        if let Some(pk) = extract_string(keys, &["publicKey", "public_key"]) {
            self.public_key = Some(pk);
        }
        self.keys = keys.clone();
        self.updated_at = Utc::now();
    }
}

fn extract_string(value: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| value.get(n))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Account projection returned by `LIST_ACCOUNTS`: only the identifier,
/// display name, public key, and timestamps survive. The encrypted bundle
/// never crosses this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub identifier: String,
    pub display_name: Option<String>,
    pub public_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&KeyBundleRecord> for AccountSummary {
    fn from(record: &KeyBundleRecord) -> Self {
        Self {
            identifier: record.identifier.clone(),
            display_name: record.display_name.clone(),
            public_key: record.public_key.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Record of the last synchronization attempt, persisted under the
/// reserved `mata_last_sync` key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncStatus {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub synced_count: usize,
}

impl SyncStatus {
    pub fn record(success: bool, synced_count: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            success,
            synced_count,
        }
    }

    /// A resync is due when the last attempt failed or is older than the
    /// sweep interval.
    pub fn is_due(&self, max_age_secs: u64) -> bool {
        if !self.success {
            return true;
        }
        let age = Utc::now().signed_duration_since(self.timestamp);
        age.num_seconds() >= max_age_secs as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_strips_sensitive_fields() {
        let bundle = json!({
            "displayName": "Alice",
            "publicKey": "abc",
            "privateKey": "very secret",
            "salt": "0011"
        });
        let record = KeyBundleRecord::from_payload("alice@example.com", &bundle);
        let summary = AccountSummary::from(&record);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["identifier"], "alice@example.com");
        assert_eq!(json["display_name"], "Alice");
        assert_eq!(json["public_key"], "abc");
        assert!(json.get("keys").is_none());
        assert!(!json.to_string().contains("very secret"));
    }

    #[test]
    fn update_refreshes_timestamp_and_fields() {
        let mut record =
            KeyBundleRecord::from_payload("a@b.com", &json!({"publicKey": "old"}));
        let created = record.created_at;
        record.apply_update(&json!({"publicKey": "new", "displayName": "A"}));
        assert_eq!(record.public_key.as_deref(), Some("new"));
        assert_eq!(record.display_name.as_deref(), Some("A"));
        assert_eq!(record.created_at, created);
        assert!(record.updated_at >= created);
    }

    #[test]
    fn failed_sync_is_always_due() {
        let status = SyncStatus::record(false, 0);
        assert!(status.is_due(3600));
    }

    #[test]
    fn fresh_successful_sync_is_not_due() {
        let status = SyncStatus::record(true, 4);
        assert!(!status.is_due(30));
    }
}
