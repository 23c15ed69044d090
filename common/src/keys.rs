// common/src/keys.rs
use serde_json::Value;

/// Singleton key holding the currently selected user's identifier.
pub const ACTIVE_USER_KEY: &str = "mata_active_user";
/// Prefix for per-user serialized key bundles.
pub const KEYS_PREFIX: &str = "mata_keys_";
/// Prefix for per-user key-derivation salts.
pub const SALT_PREFIX: &str = "mata_salt_";
/// Reserved key for the last synchronization attempt record.
pub const LAST_SYNC_KEY: &str = "mata_last_sync";
/// Reserved key for the account list owned by the worker.
pub const ACCOUNT_LIST_KEY: &str = "mata_accounts";
/// Cross-reload breadcrumb: whether the worker link was up.
pub const CONNECTED_FLAG_KEY: &str = "mata_extension_connected";
/// Cross-reload breadcrumb: last transport error observed.
pub const CONNECTION_ERROR_KEY: &str = "mata_extension_error";
/// Prefix for per-user record-store backup snapshots.
pub const BACKUP_PREFIX: &str = "mata_backup_";

/// Replace `@` and `.` with `_` to build a storage-key fragment from an
/// email address. Lossy: `a@b.com` and a literal `a_b_com` collide, so the
/// reverse mapping is heuristic only.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier.replace(['@', '.'], "_")
}

/// Candidate identifier forms for key lookup, canonical sanitization first.
///
/// Producers have not always sanitized consistently, so lookups try the
/// canonical form, then the identifier verbatim, then an `@`-only
/// replacement that keeps dots. Duplicates are removed preserving order.
pub fn candidate_identifier_forms(identifier: &str) -> Vec<String> {
    let mut forms = vec![
        sanitize_identifier(identifier),
        identifier.to_string(),
        identifier.replace('@', "_"),
    ];
    let mut seen = Vec::with_capacity(forms.len());
    forms.retain(|f| {
        if seen.contains(f) {
            false
        } else {
            seen.push(f.clone());
            true
        }
    });
    forms
}

/// Storage key for a user's key bundle.
pub fn key_bundle_key(identifier: &str) -> String {
    format!("{}{}", KEYS_PREFIX, sanitize_identifier(identifier))
}

/// Storage key for a user's record-store backup snapshot.
pub fn backup_key(identifier: &str) -> String {
    format!("{}{}", BACKUP_PREFIX, sanitize_identifier(identifier))
}

/// A key is critical when it is the active-user singleton or a per-user
/// salt/bundle entry. Critical keys are subject to periodic mirroring.
pub fn is_critical_key(key: &str) -> bool {
    key == ACTIVE_USER_KEY || key.starts_with(SALT_PREFIX) || key.starts_with(KEYS_PREFIX)
}

/// Parse a storage value that may be JSON or a raw string.
///
/// Producers do not consistently serialize, so consumers attempt a JSON
/// parse and fall back to treating the value as an opaque string.
pub fn parse_storage_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Render a storage value back to its page-side string form.
pub fn storage_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
