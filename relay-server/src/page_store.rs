// relay-server/src/page_store.rs
use serde_json::Value;
use std::collections::BTreeMap;

use common::keys::parse_storage_value;

/// Session-local mirror of the page's `localStorage`.
///
/// Mutations arrive as page frames; reads are synchronous and never
/// suspend. The page's own vault logic owns the canonical copy; this
/// mirror only reads, caches, and relays.
#[derive(Debug, Default)]
pub struct PageStore {
    entries: BTreeMap<String, String>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Tolerant read: JSON when it parses, raw string otherwise.
    pub fn get_parsed(&self, key: &str) -> Option<Value> {
        self.get(key).map(parse_storage_value)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Keys in deterministic order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
