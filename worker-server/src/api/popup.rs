// worker-server/src/api/popup.rs
//
// Read-only aggregate queries for the popup UI, plus the manual sync
// trigger. The popup renders empty arrays as its empty state and surfaces
// literal error messages for blocking failures.

use actix::Addr;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde_json::json;
use std::sync::Arc;

use common::{Config, BRIDGE_VERSION};

use crate::actors::relay_session_actor::RunStorageSync;
use crate::relay_registry::RelayRegistry;
use crate::store_actor::{DataCategory, GetAccounts, GetCategory, GetSyncStatus, VaultStoreActor};

/// Literal message the popup shows when no eligible page is connected.
pub const NO_PAGE_ERROR: &str = "Please log in to MATA web application first";

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(api_index)
        .service(list_accounts)
        .service(bank_accounts)
        .service(passwords)
        .service(contacts)
        .service(sync_status)
        .service(trigger_sync);
}

#[get("/")]
pub async fn api_index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "MATA Bridge Worker",
        "version": BRIDGE_VERSION,
    }))
}

#[get("/accounts")]
pub async fn list_accounts(store: web::Data<Addr<VaultStoreActor>>) -> impl Responder {
    match store.send(GetAccounts).await {
        Ok(accounts) => HttpResponse::Ok().json(json!({ "accounts": accounts })),
        Err(e) => {
            tracing::error!("Account listing failed: {}", e);
            HttpResponse::InternalServerError().json(json!({ "error": "Internal server error" }))
        }
    }
}

async fn category_items(
    store: &Addr<VaultStoreActor>,
    identifier: String,
    category: DataCategory,
) -> HttpResponse {
    match store.send(GetCategory { identifier, category }).await {
        Ok(items) => HttpResponse::Ok().json(json!({ "items": items })),
        Err(e) => {
            tracing::error!("Category read failed: {}", e);
            HttpResponse::InternalServerError().json(json!({ "error": "Internal server error" }))
        }
    }
}

#[get("/accounts/{identifier}/bank-accounts")]
pub async fn bank_accounts(
    path: web::Path<(String,)>,
    store: web::Data<Addr<VaultStoreActor>>,
) -> impl Responder {
    category_items(&store, path.into_inner().0, DataCategory::BankAccounts).await
}

#[get("/accounts/{identifier}/passwords")]
pub async fn passwords(
    path: web::Path<(String,)>,
    store: web::Data<Addr<VaultStoreActor>>,
) -> impl Responder {
    category_items(&store, path.into_inner().0, DataCategory::Passwords).await
}

#[get("/accounts/{identifier}/contacts")]
pub async fn contacts(
    path: web::Path<(String,)>,
    store: web::Data<Addr<VaultStoreActor>>,
) -> impl Responder {
    category_items(&store, path.into_inner().0, DataCategory::Contacts).await
}

#[get("/sync-status")]
pub async fn sync_status(store: web::Data<Addr<VaultStoreActor>>) -> impl Responder {
    match store.send(GetSyncStatus).await {
        Ok(view) => HttpResponse::Ok().json(json!({
            "status": view.status,
            "sync_due": view.sync_due,
        })),
        Err(e) => {
            tracing::error!("Sync status read failed: {}", e);
            HttpResponse::InternalServerError().json(json!({ "error": "Internal server error" }))
        }
    }
}

#[post("/sync")]
pub async fn trigger_sync(
    registry: web::Data<Arc<RelayRegistry>>,
    config: web::Data<Config>,
) -> impl Responder {
    let Some((session_id, entry)) = registry.pick_allowed(&config) else {
        return HttpResponse::Conflict().json(json!({
            "success": false,
            "error": NO_PAGE_ERROR,
        }));
    };

    tracing::info!("Manual storage sync via relay session {}", session_id);
    match entry.addr.send(RunStorageSync).await {
        Ok(report) => HttpResponse::Ok().json(report.to_value()),
        Err(e) => {
            tracing::error!("Relay session unreachable for sync: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": "Relay session unreachable",
            }))
        }
    }
}
