// worker-server/src/sync.rs
//
// Two-way storage mirror between a page's localStorage (reached through a
// relay session) and the worker's extension store.

use actix::Addr;
use serde_json::{json, Value};

use common::keys::{is_critical_key, parse_storage_value, storage_value_to_string};
use common::models::SyncStatus;
use common::{BridgeError, RequestPayload};

use crate::actors::relay_session_actor::{PageStorageRequest, RelaySessionActor};
use crate::store_actor::{GetValue, ListKeys, RecordSyncOutcome, SetValue, VaultStoreActor};

/// Outcome of one `SYNC_STORAGE` run. Per-key failures accumulate in
/// `errors` without aborting the remaining keys.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub synced_to_extension: usize,
    pub synced_to_page: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            synced_to_extension: 0,
            synced_to_page: 0,
            errors: vec![error.into()],
        }
    }

    pub fn synced_total(&self) -> usize {
        self.synced_to_extension + self.synced_to_page
    }

    pub fn to_value(&self) -> Value {
        json!({
            "success": self.success,
            "synced_to_extension": self.synced_to_extension,
            "synced_to_page": self.synced_to_page,
            "synced_count": self.synced_total(),
            "errors": self.errors,
        })
    }
}

/// Overall success rule: a clean run succeeds, and a partial run succeeds
/// as long as at least one key moved.
pub fn finalize_report(
    synced_to_extension: usize,
    synced_to_page: usize,
    errors: Vec<String>,
) -> SyncReport {
    let success = errors.is_empty() || synced_to_extension + synced_to_page > 0;
    SyncReport {
        success,
        synced_to_extension,
        synced_to_page,
        errors,
    }
}

async fn page_request(
    relay: &Addr<RelaySessionActor>,
    payload: RequestPayload,
) -> Result<Value, BridgeError> {
    let response = relay
        .send(PageStorageRequest(payload))
        .await
        .map_err(|e| BridgeError::Runtime(e.to_string()))??;
    if response.success {
        Ok(response.data)
    } else {
        Err(BridgeError::Runtime(
            response.error.unwrap_or_else(|| "page request failed".into()),
        ))
    }
}

/// Mirror critical keys page -> extension, then extension -> page.
///
/// Every cross-context call is bounded by the relay session's request
/// timeout; a timed-out key is recorded and the run continues.
pub async fn run_storage_sync(
    relay: Addr<RelaySessionActor>,
    store: Addr<VaultStoreActor>,
) -> SyncReport {
    let mut synced_to_extension = 0usize;
    let mut synced_to_page = 0usize;
    let mut errors: Vec<String> = Vec::new();

    // Enumerate the page's critical keys.
    let page_keys: Vec<String> = match page_request(&relay, RequestPayload::ListLocalStorageKeys)
        .await
    {
        Ok(data) => data["keys"]
            .as_array()
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .filter(|k| is_critical_key(k))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        Err(e) => {
            tracing::warn!("Storage sync aborted, page key listing failed: {}", e);
            return SyncReport::failed(format!("failed to list page storage keys: {}", e));
        }
    };

    // Page -> extension.
    for key in &page_keys {
        let result = async {
            let data = page_request(
                &relay,
                RequestPayload::GetLocalStorageValue { key: key.clone() },
            )
            .await?;
            let raw = data["value"].as_str().unwrap_or_default().to_string();
            store
                .send(SetValue {
                    key: key.clone(),
                    value: parse_storage_value(&raw),
                })
                .await
                .map_err(|e| BridgeError::Runtime(e.to_string()))?
        }
        .await;

        match result {
            Ok(()) => synced_to_extension += 1,
            Err(e) => errors.push(format!("{}: {}", key, e)),
        }
    }

    // Extension -> page, for critical keys the page is missing.
    let extension_keys = store.send(ListKeys).await.unwrap_or_default();
    for key in extension_keys
        .iter()
        .filter(|k| is_critical_key(k) && !page_keys.contains(k))
    {
        let result = async {
            let value = store
                .send(GetValue { key: key.clone() })
                .await
                .map_err(|e| BridgeError::Runtime(e.to_string()))?
                .ok_or_else(|| BridgeError::NotFound(key.clone()))?;
            page_request(
                &relay,
                RequestPayload::SetLocalStorageValue {
                    key: key.clone(),
                    value: storage_value_to_string(&value),
                },
            )
            .await
            .map(|_| ())
        }
        .await;

        match result {
            Ok(()) => synced_to_page += 1,
            Err(e) => errors.push(format!("{}: {}", key, e)),
        }
    }

    let report = finalize_report(synced_to_extension, synced_to_page, errors);
    store.do_send(RecordSyncOutcome(SyncStatus::record(
        report.success,
        report.synced_total(),
    )));
    tracing::info!(
        "Storage sync finished: to_extension={} to_page={} errors={}",
        report.synced_to_extension,
        report.synced_to_page,
        report.errors.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_still_succeeds() {
        // Four of five keys transferred, one failed.
        let report = finalize_report(4, 0, vec!["mata_keys_bad: timed out".into()]);
        assert!(report.success);
        assert_eq!(report.synced_total(), 4);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("mata_keys_bad"));
    }

    #[test]
    fn total_failure_reports_failure() {
        let report = finalize_report(0, 0, vec!["a: x".into(), "b: y".into()]);
        assert!(!report.success);
    }

    #[test]
    fn empty_run_is_vacuously_successful() {
        let report = finalize_report(0, 0, vec![]);
        assert!(report.success);
        assert_eq!(report.synced_total(), 0);
    }

    #[test]
    fn report_serializes_counts() {
        let report = finalize_report(3, 1, vec![]);
        let v = report.to_value();
        assert_eq!(v["synced_count"], 4);
        assert_eq!(v["success"], true);
    }
}
