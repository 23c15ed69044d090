// Dispatch-level tests against the vault store actor: round-trips,
// sanitization fallback, sweep merging, and storage diagnostics.

use actix::Actor;
use serde_json::json;
use uuid::Uuid;

use common::{BridgeRequest, CriticalFile, ErrorCode, RequestPayload};
use worker_server::storage::ExtensionStore;
use worker_server::store_actor::{Dispatch, VaultStoreActor};

fn request(payload: RequestPayload) -> Dispatch {
    Dispatch(BridgeRequest::new(payload))
}

#[actix_web::test]
async fn store_keys_then_get_keys_round_trips() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let bundle = json!({"publicKey": "abc", "encrypted": "opaque-blob"});
    let stored = store
        .send(request(RequestPayload::StoreKeys {
            identifier: Some("user@example.com".into()),
            keys: bundle.clone(),
        }))
        .await
        .unwrap();
    assert!(stored.success, "store failed: {:?}", stored.error);

    let fetched = store
        .send(request(RequestPayload::GetKeys {
            identifier: "user@example.com".into(),
        }))
        .await
        .unwrap();
    assert!(fetched.success);
    assert_eq!(fetched.data["keys"], bundle);
}

#[actix_web::test]
async fn response_echoes_request_id() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let req = BridgeRequest::new(RequestPayload::ListAccounts);
    let id = req.request_id;
    let resp = store.send(Dispatch(req)).await.unwrap();
    assert_eq!(resp.request_id, id);
}

#[actix_web::test]
async fn store_keys_without_identifier_fails() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let resp = store
        .send(request(RequestPayload::StoreKeys {
            identifier: None,
            keys: json!({"publicKey": "abc"}),
        }))
        .await
        .unwrap();
    assert!(!resp.success);
    assert_eq!(resp.error_code, Some(ErrorCode::ProcessingError));
}

#[actix_web::test]
async fn get_keys_tries_alternate_sanitization_forms() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    // A producer kept the dots when it mirrored this bundle.
    let sync = store
        .send(request(RequestPayload::SyncCriticalFiles {
            files: vec![CriticalFile {
                key: "mata_keys_a_b.com".into(),
                value: "{\"publicKey\":\"alt\"}".into(),
            }],
        }))
        .await
        .unwrap();
    assert!(sync.success);

    let fetched = store
        .send(request(RequestPayload::GetKeys {
            identifier: "a@b.com".into(),
        }))
        .await
        .unwrap();
    assert!(fetched.success, "alternate form lookup missed");
    assert_eq!(fetched.data["keys"]["publicKey"], "alt");
}

#[actix_web::test]
async fn missing_keys_report_not_found() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let resp = store
        .send(request(RequestPayload::GetKeys {
            identifier: "nobody@example.com".into(),
        }))
        .await
        .unwrap();
    assert!(!resp.success);
    assert_eq!(resp.error_code, Some(ErrorCode::NotFound));
    assert!(resp.error.unwrap().contains("No keys found"));
}

#[actix_web::test]
async fn fresh_install_lists_no_accounts_and_empty_categories() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let accounts = store.send(request(RequestPayload::ListAccounts)).await.unwrap();
    assert!(accounts.success);
    assert_eq!(accounts.data["accounts"].as_array().unwrap().len(), 0);

    let passwords = store
        .send(request(RequestPayload::GetPasswords {
            identifier: "user@example.com".into(),
        }))
        .await
        .unwrap();
    assert!(passwords.success, "no data yet is a steady state, not an error");
    assert_eq!(passwords.data["items"].as_array().unwrap().len(), 0);
}

#[actix_web::test]
async fn list_accounts_strips_sensitive_fields() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    store
        .send(request(RequestPayload::StoreKeys {
            identifier: Some("user@example.com".into()),
            keys: json!({
                "publicKey": "abc",
                "displayName": "User",
                "privateKey": "very secret",
            }),
        }))
        .await
        .unwrap();

    let resp = store.send(request(RequestPayload::ListAccounts)).await.unwrap();
    let listing = resp.data.to_string();
    assert!(listing.contains("abc"));
    assert!(!listing.contains("very secret"));
}

#[actix_web::test]
async fn upsert_keeps_one_account_per_identifier() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    for public_key in ["one", "two"] {
        store
            .send(request(RequestPayload::StoreKeys {
                identifier: Some("user@example.com".into()),
                keys: json!({"publicKey": public_key}),
            }))
            .await
            .unwrap();
    }

    let resp = store.send(request(RequestPayload::ListAccounts)).await.unwrap();
    let accounts = resp.data["accounts"].as_array().unwrap().clone();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["public_key"], "two");
}

#[actix_web::test]
async fn swept_page_bundle_is_readable_after_merge() {
    // Normal-operation scenario: the page held the active user and a
    // serialized bundle; after the sweep lands, GET_KEYS resolves it.
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let sync = store
        .send(request(RequestPayload::SyncCriticalFiles {
            files: vec![
                CriticalFile {
                    key: "mata_active_user".into(),
                    value: "user@example.com".into(),
                },
                CriticalFile {
                    key: "mata_keys_user_example_com".into(),
                    value: "{\"publicKey\":\"abc\"}".into(),
                },
            ],
        }))
        .await
        .unwrap();
    assert!(sync.success);
    assert_eq!(sync.data["stored"], 2);

    let fetched = store
        .send(request(RequestPayload::GetKeys {
            identifier: "user@example.com".into(),
        }))
        .await
        .unwrap();
    assert!(fetched.success);
    assert_eq!(fetched.data["keys"]["publicKey"], "abc");
}

#[actix_web::test]
async fn non_critical_keys_are_rejected_from_sweep_batches() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let resp = store
        .send(request(RequestPayload::SyncCriticalFiles {
            files: vec![
                CriticalFile {
                    key: "mata_keys_a_b_com".into(),
                    value: "{}".into(),
                },
                CriticalFile {
                    key: "theme".into(),
                    value: "dark".into(),
                },
            ],
        }))
        .await
        .unwrap();
    // Partial batch: one stored, one recorded as an error.
    assert!(resp.success);
    assert_eq!(resp.data["stored"], 1);
    assert_eq!(resp.data["errors"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn sync_all_data_merges_categories_and_refreshes_status() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let resp = store
        .send(request(RequestPayload::SyncAllData {
            identifier: "user@example.com".into(),
            bank_accounts: vec![json!({"iban": "DE00"})],
            passwords: vec![json!({"site": "example.com"}), json!({"site": "other.com"})],
            contacts: vec![],
        }))
        .await
        .unwrap();
    assert!(resp.success);
    assert_eq!(resp.data["synced_count"], 3);

    let status = store.send(request(RequestPayload::CheckSyncStatus)).await.unwrap();
    assert!(status.success);
    assert_eq!(status.data["status"]["success"], true);
    assert_eq!(status.data["sync_due"], false);

    let banks = store
        .send(request(RequestPayload::GetBankAccounts {
            identifier: "user@example.com".into(),
        }))
        .await
        .unwrap();
    assert_eq!(banks.data["items"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn backup_snapshot_is_persisted() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let resp = store
        .send(request(RequestPayload::BackupIndexeddb {
            identifier: "user@example.com".into(),
            database: "mata_vault".into(),
            snapshot: vec![common::StoreSnapshot {
                store: "contacts".into(),
                metadata_only: false,
                records: vec![json!({"email": "user@example.com"})],
            }],
        }))
        .await
        .unwrap();
    assert!(resp.success);
    assert_eq!(resp.data["stores"], 1);
    assert_eq!(resp.data["records"], 1);
}

#[actix_web::test]
async fn test_storage_succeeds_on_empty_but_working_store() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let resp = store.send(request(RequestPayload::TestStorage)).await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.data["storage_accessible"], true);
    assert!(resp.data["diagnostics"]["write"]["ok"].as_bool().unwrap());
}

#[actix_web::test]
async fn test_storage_reports_inaccessible_store_with_diagnostics() {
    // The store file's directory does not exist, so every step fails.
    let store = ExtensionStore::open("/nonexistent-dir/never/store.json").unwrap();
    let actor = VaultStoreActor::new(store, 30).start();

    let resp = actor.send(request(RequestPayload::TestStorage)).await.unwrap();
    assert!(!resp.success);
    assert_eq!(resp.data["storage_accessible"], false);
    let diagnostics = &resp.data["diagnostics"];
    assert_eq!(diagnostics["write"]["ok"], false);
    assert!(diagnostics["write"]["error"].is_string());
}

#[actix_web::test]
async fn heartbeat_and_extension_checks_answer_immediately() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let beat = store.send(request(RequestPayload::Heartbeat)).await.unwrap();
    assert!(beat.success);
    assert_eq!(beat.data["alive"], true);

    let check = store.send(request(RequestPayload::CheckExtension)).await.unwrap();
    assert!(check.success);
    assert!(check.data["version"].is_string());
    assert!(Uuid::parse_str(check.data["instance_id"].as_str().unwrap()).is_ok());
}

#[actix_web::test]
async fn page_only_messages_are_rejected_by_the_dispatcher() {
    let store = VaultStoreActor::new(ExtensionStore::in_memory(), 30).start();

    let resp = store
        .send(request(RequestPayload::PageNavigated {
            path: "/vault".into(),
        }))
        .await
        .unwrap();
    assert!(!resp.success);
    assert_eq!(resp.error_code, Some(ErrorCode::ProcessingError));
}
