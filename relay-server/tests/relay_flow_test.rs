// Scenario tests for the relay's local resolution pipeline: page store,
// key cache, sweep, and backup working together the way a page session
// drives them.

use serde_json::json;

use common::keys::key_bundle_key;
use relay_server::backup::build_backup_jobs;
use relay_server::cache::{resolve_bundle, KeyCache, StorageSource};
use relay_server::page_store::PageStore;
use relay_server::record_store::RecordStore;
use relay_server::sweep::{batch_files, collect_critical_files};

#[test]
fn fresh_install_resolves_nothing_and_sweeps_nothing() {
    let page = PageStore::new();
    let mut cache = KeyCache::new();

    assert!(resolve_bundle(&mut cache, &page, "user@example.com").is_none());
    assert!(collect_critical_files(&page).is_empty());
    assert!(build_backup_jobs(&page, &RecordStore::new()).is_empty());
}

#[test]
fn normal_operation_resolves_bundle_from_either_tier() {
    let mut page = PageStore::new();
    page.set("mata_active_user", "user@example.com");
    page.set("mata_keys_user_example_com", "{\"publicKey\":\"abc\"}");

    // First read comes from the page store and is promoted.
    let mut cache = KeyCache::new();
    let (value, source) = resolve_bundle(&mut cache, &page, "user@example.com").unwrap();
    assert_eq!(source, StorageSource::PageLocal);
    assert_eq!(value["publicKey"], "abc");

    // Second read is served from the cache, same contents.
    let (value, source) = resolve_bundle(&mut cache, &page, "user@example.com").unwrap();
    assert_eq!(source, StorageSource::Cache);
    assert_eq!(value["publicKey"], "abc");

    // The sweep forwards both critical entries in one batch.
    let batches = batch_files(collect_critical_files(&page), 3);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[test]
fn store_keys_cache_insert_beats_async_persistence() {
    // The session inserts synchronously before the upstream round-trip
    // begins; a same-session GET_KEYS issued right after must hit.
    let page = PageStore::new();
    let mut cache = KeyCache::new();

    let bundle = json!({"publicKey": "abc", "email": "user@example.com"});
    cache.insert(
        key_bundle_key("user@example.com"),
        bundle.clone(),
        StorageSource::Cache,
    );

    let (value, source) = resolve_bundle(&mut cache, &page, "user@example.com").unwrap();
    assert_eq!(source, StorageSource::Cache);
    assert_eq!(value, bundle);
}

#[test]
fn navigation_invalidation_falls_back_to_page_store() {
    let mut page = PageStore::new();
    page.set("mata_keys_user_example_com", "{\"publicKey\":\"abc\"}");

    let mut cache = KeyCache::new();
    resolve_bundle(&mut cache, &page, "user@example.com").unwrap();
    assert!(!cache.is_empty());

    // Route change clears the cache; the next read re-reads the page.
    cache.clear();
    let (_, source) = resolve_bundle(&mut cache, &page, "user@example.com").unwrap();
    assert_eq!(source, StorageSource::PageLocal);
}

#[test]
fn backup_covers_known_users_active_first() {
    let mut page = PageStore::new();
    page.set("mata_active_user", "second@example.com");
    page.set("mata_keys_first_example_com", "{}");
    page.set("mata_keys_second_example_com", "{}");

    let mut records = RecordStore::new();
    records.put("mata_vault", "contacts", json!({"email": "first@example.com"}));
    records.put("mata_vault", "contacts", json!({"email": "second@example.com"}));

    let jobs = build_backup_jobs(&page, &records);
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].identifier, "second_example_com");
    assert_eq!(jobs[1].identifier, "first_example_com");
    for job in &jobs {
        assert_eq!(job.snapshot[0].records.len(), 1, "other users' records filtered out");
    }
}
