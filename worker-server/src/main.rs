// worker-server/src/main.rs

use actix::Actor;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;

use common::{setup_tracing, Config};
use worker_server::relay_registry::RelayRegistry;
use worker_server::routing::routes;
use worker_server::storage::ExtensionStore;
use worker_server::store_actor::VaultStoreActor;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    setup_tracing();

    let config = Config::from_env();
    let server_addr = config.worker_addr.clone();

    let store = match ExtensionStore::open(&config.storage_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(
                "Failed to open store at {}: {}; continuing with volatile storage",
                config.storage_path,
                e
            );
            ExtensionStore::in_memory()
        }
    };

    let store_actor = VaultStoreActor::new(store, config.timing.sweep_interval_secs).start();
    let registry = Arc::new(RelayRegistry::new());

    tracing::info!("Starting MATA worker on {}", server_addr);

    let config_data = web::Data::new(config);
    let store_data = web::Data::new(store_actor);
    let registry_data = web::Data::new(registry);

    HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(store_data.clone())
            .app_data(registry_data.clone())
            .configure(routes)
    })
    .bind(&server_addr)?
    .run()
    .await
}
