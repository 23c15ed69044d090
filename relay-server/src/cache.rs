// relay-server/src/cache.rs
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use common::keys::{candidate_identifier_forms, KEYS_PREFIX};

use crate::page_store::PageStore;

/// Where a cached value was last read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageSource {
    Cache,
    PageLocal,
    ExtensionLocal,
}

impl StorageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageSource::Cache => "cache",
            StorageSource::PageLocal => "page",
            StorageSource::ExtensionLocal => "extension",
        }
    }
}

/// One cached key with its provenance.
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub value: Value,
    pub source: StorageSource,
    pub cached_at: DateTime<Utc>,
}

/// Session-scoped key cache.
///
/// Owned by the page-session actor and passed by reference to the lookup
/// paths; its lifetime is the session's, so navigation and storage-change
/// invalidation are explicit calls rather than global-state bookkeeping.
#[derive(Debug, Default)]
pub struct KeyCache {
    entries: HashMap<String, SyncRecord>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SyncRecord> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value, source: StorageSource) {
        self.entries.insert(
            key.into(),
            SyncRecord {
                value,
                source,
                cached_at: Utc::now(),
            },
        );
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve a user's key bundle without leaving the page context.
///
/// Tries the cache, then the page store, each under every candidate
/// sanitization form (canonical first), stopping at the first hit. A page
/// hit is promoted into the cache. `None` means the caller must go to
/// extension storage.
pub fn resolve_bundle(
    cache: &mut KeyCache,
    store: &PageStore,
    identifier: &str,
) -> Option<(Value, StorageSource)> {
    let forms = candidate_identifier_forms(identifier);

    for form in &forms {
        let key = format!("{}{}", KEYS_PREFIX, form);
        if let Some(record) = cache.get(&key) {
            return Some((record.value.clone(), StorageSource::Cache));
        }
    }

    for form in &forms {
        let key = format!("{}{}", KEYS_PREFIX, form);
        if let Some(value) = store.get_parsed(&key) {
            cache.insert(key, value.clone(), StorageSource::PageLocal);
            return Some((value, StorageSource::PageLocal));
        }
    }

    None
}

/// Resolve an arbitrary storage key from cache or page store.
pub fn resolve_value(
    cache: &mut KeyCache,
    store: &PageStore,
    key: &str,
) -> Option<(Value, StorageSource)> {
    if let Some(record) = cache.get(key) {
        return Some((record.value.clone(), StorageSource::Cache));
    }
    if let Some(value) = store.get_parsed(key) {
        cache.insert(key.to_string(), value.clone(), StorageSource::PageLocal);
        return Some((value, StorageSource::PageLocal));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_hit_wins_over_page_store() {
        let mut cache = KeyCache::new();
        let mut store = PageStore::new();
        store.set("mata_keys_a_b_com", "{\"publicKey\":\"stale\"}");
        cache.insert("mata_keys_a_b_com", json!({"publicKey": "fresh"}), StorageSource::Cache);

        let (value, source) = resolve_bundle(&mut cache, &store, "a@b.com").unwrap();
        assert_eq!(source, StorageSource::Cache);
        assert_eq!(value["publicKey"], "fresh");
    }

    #[test]
    fn page_hit_is_promoted_into_cache() {
        let mut cache = KeyCache::new();
        let mut store = PageStore::new();
        store.set("mata_keys_a_b_com", "{\"publicKey\":\"abc\"}");

        let (value, source) = resolve_bundle(&mut cache, &store, "a@b.com").unwrap();
        assert_eq!(source, StorageSource::PageLocal);
        assert_eq!(value["publicKey"], "abc");
        assert!(cache.get("mata_keys_a_b_com").is_some());
    }

    #[test]
    fn alternate_sanitization_forms_are_tried() {
        let mut cache = KeyCache::new();
        let mut store = PageStore::new();
        // Producer kept the dots when it built the key.
        store.set("mata_keys_a_b.com", "{\"publicKey\":\"alt\"}");

        let (value, _) = resolve_bundle(&mut cache, &store, "a@b.com").unwrap();
        assert_eq!(value["publicKey"], "alt");
    }

    #[test]
    fn miss_after_all_forms() {
        let mut cache = KeyCache::new();
        let store = PageStore::new();
        assert!(resolve_bundle(&mut cache, &store, "a@b.com").is_none());
    }

    #[test]
    fn store_then_immediate_get_hits_cache() {
        // STORE_KEYS inserts synchronously before the async persistence
        // round-trip; a same-session GET_KEYS must observe it.
        let mut cache = KeyCache::new();
        let store = PageStore::new();
        cache.insert(
            common::keys::key_bundle_key("a@b.com"),
            json!({"publicKey": "abc"}),
            StorageSource::Cache,
        );
        let (value, source) = resolve_bundle(&mut cache, &store, "a@b.com").unwrap();
        assert_eq!(source, StorageSource::Cache);
        assert_eq!(value["publicKey"], "abc");
    }

    #[test]
    fn invalidation_and_clear() {
        let mut cache = KeyCache::new();
        cache.insert("k", json!(1), StorageSource::PageLocal);
        cache.invalidate("k");
        assert!(cache.get("k").is_none());

        cache.insert("a", json!(1), StorageSource::PageLocal);
        cache.insert("b", json!(2), StorageSource::PageLocal);
        cache.clear();
        assert!(cache.is_empty());
    }
}
