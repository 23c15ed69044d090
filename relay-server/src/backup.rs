// relay-server/src/backup.rs
//
// Best-effort backup of the page's structured databases. Object stores
// are classified by name pattern, reads are capped, secret-bearing fields
// are stripped, and multi-user stores are filtered down to the target
// user's records before the snapshot goes upstream.

use serde_json::{Map, Value};

use common::keys::{candidate_identifier_forms, sanitize_identifier, ACTIVE_USER_KEY, KEYS_PREFIX};
use common::StoreSnapshot;

use crate::page_store::PageStore;
use crate::record_store::{RecordStore, KNOWN_DATABASES};

/// Name fragments marking an object store as worth backing up.
const CRITICAL_STORE_PATTERNS: &[&str] = &[
    "account", "credential", "vault", "key", "password", "contact", "setting",
];

/// Name fragments marking a store as large; large stores get the higher
/// record cap.
const LARGE_STORE_PATTERNS: &[&str] = &["transaction", "history", "log"];

/// Stores whose records are secret-bearing and must be reduced to a
/// metadata-only projection before leaving the page context.
const SENSITIVE_STORE_PATTERNS: &[&str] = &["credential", "key", "password"];

/// Stores included for every user even when record ownership cannot be
/// determined.
const SHARED_STORE_ALLOW_LIST: &[&str] = &["settings", "preferences", "metadata"];

/// Field names commonly holding a record's owner.
const OWNER_FIELDS: &[&str] = &["email", "user", "owner", "userId", "user_id", "identifier"];

/// Field-name fragments suggesting secret material.
const SECRET_FIELD_PATTERNS: &[&str] = &["password", "key", "token"];

const LARGE_STORE_RECORD_CAP: usize = 100;
const DEFAULT_RECORD_CAP: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreClass {
    pub critical: bool,
    pub large: bool,
    pub sensitive: bool,
    pub shared: bool,
}

fn matches_any(name: &str, patterns: &[&str]) -> bool {
    let lower = name.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

pub fn classify_store(name: &str) -> StoreClass {
    StoreClass {
        critical: matches_any(name, CRITICAL_STORE_PATTERNS),
        large: matches_any(name, LARGE_STORE_PATTERNS),
        sensitive: matches_any(name, SENSITIVE_STORE_PATTERNS),
        shared: matches_any(name, SHARED_STORE_ALLOW_LIST),
    }
}

pub fn record_cap(class: StoreClass) -> usize {
    if class.large {
        LARGE_STORE_RECORD_CAP
    } else {
        DEFAULT_RECORD_CAP
    }
}

/// Strip any top-level field whose name suggests secret material.
pub fn project_metadata(record: &Value) -> Value {
    match record {
        Value::Object(fields) => {
            let projected: Map<String, Value> = fields
                .iter()
                .filter(|(name, _)| !matches_any(name, SECRET_FIELD_PATTERNS))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            Value::Object(projected)
        }
        other => other.clone(),
    }
}

/// Whether a record belongs to `identifier`. `None` when no owner field is
/// present, so ownership cannot be determined.
///
/// Owner fields are compared against the identifier's normalized and
/// sanitized forms; the sanitization is lossy, so this match is heuristic.
pub fn record_owned_by(record: &Value, identifier: &str) -> Option<bool> {
    let fields = record.as_object()?;
    let target = sanitize_identifier(identifier);

    let mut saw_owner_field = false;
    for name in OWNER_FIELDS {
        if let Some(owner) = fields.get(*name).and_then(Value::as_str) {
            saw_owner_field = true;
            if candidate_identifier_forms(owner)
                .iter()
                .any(|form| sanitize_identifier(form) == target)
            {
                return Some(true);
            }
        }
    }

    if saw_owner_field {
        Some(false)
    } else {
        None
    }
}

/// Snapshot every critical store of one database for one user.
pub fn snapshot_database(
    records: &RecordStore,
    database: &str,
    identifier: &str,
) -> Vec<StoreSnapshot> {
    let mut snapshots = Vec::new();

    for store_name in records.stores(database) {
        let class = classify_store(&store_name);
        if !class.critical {
            continue;
        }

        let cap = record_cap(class);
        let selected: Vec<Value> = records
            .records(database, &store_name)
            .iter()
            .filter(|record| match record_owned_by(record, identifier) {
                Some(owned) => owned,
                None => class.shared,
            })
            .take(cap)
            .map(|record| {
                if class.sensitive {
                    project_metadata(record)
                } else {
                    record.clone()
                }
            })
            .collect();

        snapshots.push(StoreSnapshot {
            store: store_name,
            metadata_only: class.sensitive,
            records: selected,
        });
    }

    snapshots
}

/// Users to back up this session, active user first.
///
/// Identifiers are recovered from `mata_keys_*` key names, so they are the
/// sanitized forms; the active user's entry is matched through the same
/// transform.
pub fn backup_queue(store: &PageStore) -> Vec<String> {
    let active = store
        .get(ACTIVE_USER_KEY)
        .map(sanitize_identifier)
        .unwrap_or_default();

    let mut users: Vec<String> = store
        .keys()
        .into_iter()
        .filter_map(|key| key.strip_prefix(KEYS_PREFIX).map(str::to_string))
        .collect();

    users.sort();
    users.dedup();
    if let Some(pos) = users.iter().position(|u| *u == active) {
        let active_user = users.remove(pos);
        users.insert(0, active_user);
    }
    users
}

/// One queued upstream backup request.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub identifier: String,
    pub database: String,
    pub snapshot: Vec<StoreSnapshot>,
}

/// Build the full per-user, per-database backup job list. Jobs with empty
/// snapshots are skipped; the per-user chain advances regardless of
/// individual job failures at send time.
pub fn build_backup_jobs(page: &PageStore, records: &RecordStore) -> Vec<BackupJob> {
    let mut jobs = Vec::new();
    for identifier in backup_queue(page) {
        for database in KNOWN_DATABASES {
            let snapshot = snapshot_database(records, database, &identifier);
            if snapshot.iter().any(|s| !s.records.is_empty()) {
                jobs.push(BackupJob {
                    identifier: identifier.clone(),
                    database: (*database).to_string(),
                    snapshot,
                });
            }
        }
    }
    jobs
}
