// relay-server/src/record_store.rs
//
// Session-local mirror of the page's structured databases (the IndexedDB
// analog): named databases holding named object stores holding JSON
// records. Records arrive as PUT_RECORD frames from the page; the backup
// pass reads them back out.

use serde_json::Value;
use std::collections::BTreeMap;

/// Database names the backup pass knows to look for. Anything else the
/// page pushes is kept but never backed up.
pub const KNOWN_DATABASES: &[&str] = &["mata_vault", "mata_banking", "mata_settings"];

#[derive(Debug, Default)]
pub struct RecordStore {
    databases: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, database: impl Into<String>, store: impl Into<String>, record: Value) {
        self.databases
            .entry(database.into())
            .or_default()
            .entry(store.into())
            .or_default()
            .push(record);
    }

    /// Object store names of one database, deterministic order.
    pub fn stores(&self, database: &str) -> Vec<String> {
        self.databases
            .get(database)
            .map(|stores| stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn records(&self, database: &str, store: &str) -> &[Value] {
        self.databases
            .get(database)
            .and_then(|stores| stores.get(store))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.databases
            .values()
            .flat_map(|stores| stores.values())
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_and_read_back() {
        let mut store = RecordStore::new();
        store.put("mata_vault", "accounts", json!({"email": "a@b.com"}));
        store.put("mata_vault", "accounts", json!({"email": "c@d.com"}));
        store.put("mata_vault", "settings", json!({"theme": "dark"}));

        assert_eq!(store.records("mata_vault", "accounts").len(), 2);
        assert_eq!(store.stores("mata_vault"), vec!["accounts", "settings"]);
        assert_eq!(store.record_count(), 3);
    }

    #[test]
    fn unknown_database_reads_empty() {
        let store = RecordStore::new();
        assert!(store.records("mata_vault", "accounts").is_empty());
        assert!(store.stores("mata_vault").is_empty());
        assert!(store.is_empty());
    }
}
