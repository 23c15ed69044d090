// worker-server/src/routing.rs
use actix::Addr;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use common::{BridgeError, Config};

use crate::actors::relay_session_actor::RelaySessionActor;
use crate::api;
use crate::relay_registry::RelayRegistry;
use crate::store_actor::VaultStoreActor;

/// Configure routes for the worker server
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws/relay").route(web::get().to(relay_ws_route)))
        .service(web::scope("/api").configure(api::configure));
}

/// WebSocket route for relay connections. A relay must declare the page
/// origin it fronts; unknown origins are rejected before any handler runs.
async fn relay_ws_route(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<HashMap<String, String>>,
    store: web::Data<Addr<VaultStoreActor>>,
    registry: web::Data<Arc<RelayRegistry>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, Error> {
    let origin = match query.get("origin") {
        Some(origin) => origin.clone(),
        None => {
            tracing::warn!("Relay connection attempt without origin");
            return Ok(HttpResponse::BadRequest().finish());
        }
    };

    if Url::parse(&origin).is_err() {
        tracing::warn!("Relay connection attempt with malformed origin: {}", origin);
        return Ok(HttpResponse::BadRequest().finish());
    }

    if !config.origin_allowed(&origin) {
        tracing::warn!("Relay connection attempt from unauthorized origin: {}", origin);
        let error = BridgeError::UnauthorizedOrigin(origin);
        return Ok(HttpResponse::Forbidden().json(serde_json::json!({
            "success": false,
            "error": error.to_string(),
            "error_code": error.code(),
        })));
    }

    let session = RelaySessionActor::new(
        origin,
        store.get_ref().clone(),
        registry.get_ref().clone(),
        Duration::from_secs(config.timing.request_timeout_secs),
    );

    ws::start(session, &req, stream)
}
