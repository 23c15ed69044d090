// worker-server/src/storage.rs
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("storage serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistent key-value store owned by the worker.
///
/// The file is a single JSON object, loaded on startup and rewritten on
/// every mutation. Nothing outside the store actor touches it, so
/// read-modify-write sequences are serialized by the actor mailbox.
pub struct ExtensionStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, Value>,
}

impl ExtensionStore {
    /// Volatile store, used by tests and as a fallback when no path is
    /// configured.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
        }
    }

    /// Open (or lazily create) the store file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<(), StoreError> {
        self.entries.insert(key.into(), value);
        self.persist()
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<Value>, StoreError> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-read the persisted state, returning the entry count. Used by the
    /// storage diagnostics to observe what actually reached disk rather
    /// than what sits in memory.
    pub fn reload(&mut self) -> Result<usize, StoreError> {
        if let Some(path) = &self.path {
            let raw = fs::read_to_string(path)?;
            self.entries = serde_json::from_str(&raw)?;
        }
        Ok(self.entries.len())
    }

    fn persist(&self) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            let raw = serde_json::to_string_pretty(&self.entries)?;
            fs::write(path, raw)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_memory_set_get_remove() {
        let mut store = ExtensionStore::in_memory();
        assert!(store.is_empty());
        store.set("mata_active_user", json!("a@b.com")).unwrap();
        assert_eq!(store.get("mata_active_user"), Some(&json!("a@b.com")));
        assert_eq!(store.remove("mata_active_user").unwrap(), Some(json!("a@b.com")));
        assert!(store.get("mata_active_user").is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = ExtensionStore::open(&path).unwrap();
        store.set("mata_keys_a_b_com", json!({"publicKey": "abc"})).unwrap();
        drop(store);

        let store = ExtensionStore::open(&path).unwrap();
        assert_eq!(store.get("mata_keys_a_b_com").unwrap()["publicKey"], "abc");
    }

    #[test]
    fn keys_enumerate_deterministically() {
        let mut store = ExtensionStore::in_memory();
        store.set("b", json!(2)).unwrap();
        store.set("a", json!(1)).unwrap();
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unwritable_path_fails_on_set() {
        let mut store = ExtensionStore {
            path: Some(PathBuf::from("/nonexistent-dir/never/store.json")),
            entries: BTreeMap::new(),
        };
        assert!(store.set("k", json!(1)).is_err());
        assert!(store.reload().is_err());
    }
}
