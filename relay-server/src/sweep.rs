// relay-server/src/sweep.rs
//
// Critical-file sweep: enumerate the page store for critical keys and
// batch them for forwarding to the worker.

use common::keys::is_critical_key;
use common::CriticalFile;

use crate::page_store::PageStore;

/// Enumerate the page store's critical entries in deterministic order.
///
/// Two sweeps over unchanged storage yield identical contents, so the
/// forwarded batches are idempotent.
pub fn collect_critical_files(store: &PageStore) -> Vec<CriticalFile> {
    store
        .keys()
        .into_iter()
        .filter(|k| is_critical_key(k))
        .filter_map(|key| {
            store.get(&key).map(|value| CriticalFile {
                key: key.clone(),
                value: value.to_string(),
            })
        })
        .collect()
}

/// Split sweep contents into fixed-size batches, bounding the payload of
/// any single `SYNC_CRITICAL_FILES` message.
pub fn batch_files(files: Vec<CriticalFile>, batch_size: usize) -> Vec<Vec<CriticalFile>> {
    if files.is_empty() {
        return Vec::new();
    }
    let batch_size = batch_size.max(1);
    files
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_store() -> PageStore {
        let mut store = PageStore::new();
        store.set("mata_active_user", "a@b.com");
        store.set("mata_keys_a_b_com", "{\"publicKey\":\"abc\"}");
        store.set("mata_salt_a_b_com", "aabb");
        store.set("mata_keys_c_d_com", "{\"publicKey\":\"def\"}");
        store.set("theme", "dark");
        store.set("mata_last_sync", "{\"success\":true}");
        store
    }

    #[test]
    fn only_critical_keys_are_swept() {
        let files = collect_critical_files(&populated_store());
        let keys: Vec<&str> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "mata_active_user",
                "mata_keys_a_b_com",
                "mata_keys_c_d_com",
                "mata_salt_a_b_com",
            ]
        );
    }

    #[test]
    fn sweep_is_idempotent_over_unchanged_storage() {
        let store = populated_store();
        let first = collect_critical_files(&store);
        let second = collect_critical_files(&store);
        assert_eq!(first, second);
        assert_eq!(
            batch_files(first, 3),
            batch_files(second.clone(), 3)
        );
    }

    #[test]
    fn batches_are_fixed_size_with_remainder() {
        let files = collect_critical_files(&populated_store());
        let batches = batch_files(files, 3);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn fresh_install_sweeps_nothing() {
        let store = PageStore::new();
        let files = collect_critical_files(&store);
        assert!(files.is_empty());
        assert!(batch_files(files, 3).is_empty());
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let files = collect_critical_files(&populated_store());
        let batches = batch_files(files, 0);
        assert!(batches.iter().all(|b| b.len() == 1));
    }
}
